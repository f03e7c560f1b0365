// Device buffers for vertex, index, uniform and storage data
//
// A `Buffer` owns one device allocation. Every call is checked against the
// device error flag and the first failure aborts the operation.

use std::fmt;
use std::ptr::NonNull;

use super::device::{create_object, DeviceRef, Handle};
use super::layout::VertexLayout;
use crate::error::{DeviceError, Error, Result};

/// What the buffer holds; selects the binding target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    ShaderStorage,
}

impl BufferKind {
    /// Whether the kind has indexed binding points
    pub fn is_indexed(self) -> bool {
        matches!(self, Self::Uniform | Self::ShaderStorage)
    }
}

/// Access requested when mapping a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    Read,
    Write,
    ReadWrite,
}

impl MapAccess {
    pub fn readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// One device memory allocation.
///
/// Created empty; one of the `init*` calls allocates it. Every operation
/// leaves the buffer unbound on success.
pub struct Buffer {
    device: DeviceRef,
    handle: Handle,
    kind: BufferKind,
    size: usize,
}

impl Buffer {
    pub fn new(device: DeviceRef, kind: BufferKind) -> Self {
        Self {
            device,
            handle: 0,
            kind,
            size: 0,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Allocated size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    // =========================================================================
    // ALLOCATION
    // =========================================================================

    /// Allocate `size` bytes of uninitialized storage, to be filled by
    /// `upload` or a write mapping.
    pub fn init(&mut self, size: usize) -> Result<()> {
        self.allocate(size, None)
    }

    /// Allocate exactly `data.len()` bytes and copy `data` into them
    pub fn init_with_data(&mut self, data: &[u8]) -> Result<()> {
        self.allocate(data.len(), Some(data))
    }

    /// Allocate `size` bytes, optionally copying `data`, and attach `layout`
    /// to the currently bound vertex array.
    pub fn init_with_layout(
        &mut self,
        size: usize,
        data: Option<&[u8]>,
        layout: &VertexLayout,
    ) -> Result<()> {
        self.allocate(size, data)?;
        self.set_layout(layout)
    }

    fn allocate(&mut self, size: usize, data: Option<&[u8]>) -> Result<()> {
        if let Some(data) = data {
            if data.len() != size {
                return Err(Error::SizeMismatch {
                    expected: size,
                    actual: data.len(),
                });
            }
        }

        device_range(size)?;

        self.free_mem();
        self.handle = create_object(&*self.device, "buffer", |d| d.create_buffer())?;
        self.size = size;

        self.bind()?;
        checked!(self.device, buffer_data(self.kind, size, data));
        self.unbind()
    }

    // =========================================================================
    // DATA
    // =========================================================================

    /// Overwrite `data.len()` bytes starting at `offset`. The allocation is
    /// not resized; writing past its end is reported by the device.
    pub fn upload(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        device_range(offset)?;
        device_range(data.len())?;
        self.bind()?;
        checked!(self.device, buffer_sub_data(self.kind, offset, data));
        self.unbind()
    }

    /// Describe the buffer's vertex format to the bound vertex array.
    ///
    /// Attribute `i` goes to slot `i` with the layout's stride and the byte
    /// offset given by [`VertexLayout::offsets`].
    pub fn set_layout(&mut self, layout: &VertexLayout) -> Result<()> {
        self.bind()?;
        let stride = layout.stride() as i32;
        for (slot, attribute, offset) in layout.offsets() {
            checked!(
                self.device,
                vertex_attrib_pointer(
                    slot,
                    attribute.count as i32,
                    attribute.ty,
                    attribute.normalized,
                    stride,
                    offset as i32,
                )
            );
            checked!(self.device, enable_vertex_attrib_array(slot));
        }
        self.unbind()
    }

    /// Map the whole buffer. The returned guard borrows the buffer mutably,
    /// so nothing else can be issued on it until the mapping ends.
    pub fn map(&mut self, access: MapAccess) -> Result<Mapping<'_>> {
        self.bind()?;
        let ptr = checked!(self.device, map_buffer(self.kind, self.size, access));
        if let Err(e) = self.unbind() {
            // Mapped but no guard will be returned
            let _ = self.end_map();
            return Err(e);
        }

        let ptr = NonNull::new(ptr).ok_or(Error::MapFailed {
            handle: self.handle,
        })?;
        let len = self.size;
        Ok(Mapping {
            buffer: self,
            ptr,
            len,
            access,
            mapped: true,
        })
    }

    fn end_map(&mut self) -> Result<()> {
        self.bind()?;
        checked!(self.device, unmap_buffer(self.kind));
        self.unbind()
    }

    // =========================================================================
    // BINDING
    // =========================================================================

    pub fn bind(&self) -> Result<()> {
        checked!(self.device, bind_buffer(self.kind, self.handle));
        Ok(())
    }

    pub fn unbind(&self) -> Result<()> {
        checked!(self.device, bind_buffer(self.kind, 0));
        Ok(())
    }

    /// Bind to the generic target and to binding point `index`.
    /// Only uniform and storage buffers have binding points; other kinds
    /// get an invalid-enum error from the device.
    pub fn bind_base(&self, index: u32) -> Result<()> {
        self.bind()?;
        checked!(self.device, bind_buffer_base(self.kind, index, self.handle));
        Ok(())
    }

    /// Release the allocation. Safe to call repeatedly.
    pub fn free_mem(&mut self) {
        if self.handle != 0 {
            self.device.delete_buffer(self.handle);
            log::trace!("Released buffer {}", self.handle);
            self.handle = 0;
            self.size = 0;
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.free_mem();
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .finish()
    }
}

/// Sizes and offsets reach the device as 32-bit signed values
fn device_range(value: usize) -> Result<()> {
    i32::try_from(value)
        .map(drop)
        .map_err(|_| Error::Device(DeviceError::InvalidValue))
}

// =============================================================================
// MAPPING
// =============================================================================

/// Live mapping of a buffer's storage.
///
/// Dropping the guard unmaps and discards any error; call [`Mapping::unmap`]
/// to observe it.
#[derive(Debug)]
pub struct Mapping<'a> {
    buffer: &'a mut Buffer,
    ptr: NonNull<u8>,
    len: usize,
    access: MapAccess,
    mapped: bool,
}

impl Mapping<'_> {
    pub fn access(&self) -> MapAccess {
        self.access
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mapped bytes, if the mapping grants read access
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.access.readable().then(|| {
            // SAFETY: the device keeps `len` bytes at `ptr` valid until unmap,
            // and the guard's borrow of the buffer prevents any other call on it.
            unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
        })
    }

    /// Mapped bytes, if the mapping grants write access
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.access.writable() {
            return None;
        }
        // SAFETY: as in `as_slice`; `&mut self` makes the slice unique.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }

    /// End the mapping. The pointer is invalid afterwards.
    pub fn unmap(mut self) -> Result<()> {
        self.mapped = false;
        self.buffer.end_map()
    }
}

impl Drop for Mapping<'_> {
    fn drop(&mut self) {
        if self.mapped {
            let _ = self.buffer.end_map();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::Device;
    use crate::backend::layout::ComponentType;
    use crate::backend::soft::SoftDevice;
    use crate::error::DeviceError;
    use std::rc::Rc;

    fn setup(kind: BufferKind) -> (Rc<SoftDevice>, Buffer) {
        let soft = SoftDevice::new();
        let buffer = Buffer::new(soft.clone(), kind);
        (soft, buffer)
    }

    #[test]
    fn init_copies_data_and_unbinds() {
        let (soft, mut buffer) = setup(BufferKind::Vertex);
        buffer.init_with_data(&[1, 2, 3, 4]).unwrap();
        assert_ne!(buffer.handle(), 0);
        assert_eq!(buffer.size(), 4);
        assert_eq!(soft.buffer_contents(buffer.handle()).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(soft.bound_buffer(BufferKind::Vertex), 0);
    }

    #[test]
    fn length_mismatch_is_rejected_before_allocation() {
        let (soft, mut buffer) = setup(BufferKind::Vertex);
        let err = buffer.init_with_layout(8, Some(&[0; 4]), &VertexLayout::new()).unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { expected: 8, actual: 4 }));
        assert_eq!(buffer.handle(), 0);
        assert_eq!(soft.live_objects(), 0);
    }

    #[test]
    fn upload_writes_in_place() {
        let (soft, mut buffer) = setup(BufferKind::Vertex);
        buffer.init(6).unwrap();
        buffer.upload(2, &[9, 9]).unwrap();
        assert_eq!(soft.buffer_contents(buffer.handle()).unwrap(), vec![0, 0, 9, 9, 0, 0]);
    }

    #[test]
    fn upload_past_end_reports_device_error() {
        let (_soft, mut buffer) = setup(BufferKind::Vertex);
        buffer.init(4).unwrap();
        let err = buffer.upload(3, &[1, 2]).unwrap_err();
        assert_eq!(err.device_error(), Some(DeviceError::InvalidValue));
    }

    #[test]
    fn layout_goes_into_bound_vertex_array() {
        let (soft, mut buffer) = setup(BufferKind::Vertex);
        let vao = soft.create_vertex_array().unwrap();
        soft.bind_vertex_array(vao);

        let mut layout = VertexLayout::new();
        layout
            .add_attribute(ComponentType::Float, 3, false)
            .add_attribute(ComponentType::Int, 1, true);
        buffer.init_with_layout(32, None, &layout).unwrap();

        let position = soft.attribute(vao, 0).unwrap();
        assert_eq!((position.count, position.stride, position.offset), (3, 16, 0));
        assert!(position.enabled);
        let id = soft.attribute(vao, 1).unwrap();
        assert_eq!((id.ty, id.offset), (ComponentType::Int, 12));
        assert!(!id.normalized);
        assert_eq!(id.buffer, buffer.handle());
    }

    #[test]
    fn layout_without_vertex_array_fails() {
        let (_soft, mut buffer) = setup(BufferKind::Vertex);
        let mut layout = VertexLayout::new();
        layout.add_attribute(ComponentType::Float, 2, false);
        let err = buffer.init_with_layout(8, None, &layout).unwrap_err();
        assert_eq!(err.device_error(), Some(DeviceError::InvalidOperation));
    }

    #[test]
    fn write_mapping_then_read_back() {
        let (_soft, mut buffer) = setup(BufferKind::ShaderStorage);
        buffer.init(4).unwrap();

        let mut mapping = buffer.map(MapAccess::Write).unwrap();
        assert!(mapping.as_slice().is_none());
        mapping.as_mut_slice().unwrap().copy_from_slice(&[5, 6, 7, 8]);
        mapping.unmap().unwrap();

        let mapping = buffer.map(MapAccess::Read).unwrap();
        assert_eq!(mapping.as_slice().unwrap(), &[5, 6, 7, 8]);
    }

    #[test]
    fn dropping_mapping_unmaps() {
        let (soft, mut buffer) = setup(BufferKind::Vertex);
        buffer.init_with_data(&[1; 8]).unwrap();
        let handle = buffer.handle();
        {
            let _mapping = buffer.map(MapAccess::ReadWrite).unwrap();
            assert!(soft.is_mapped(handle));
        }
        assert!(!soft.is_mapped(handle));
        buffer.upload(0, &[2]).unwrap();
    }

    #[test]
    fn failed_unbind_after_map_leaves_buffer_unmapped() {
        let (soft, mut buffer) = setup(BufferKind::Vertex);
        buffer.init_with_data(&[1, 2, 3, 4]).unwrap();
        let handle = buffer.handle();

        // bind, map, then fail the unbind
        soft.fail_after(2, DeviceError::OutOfMemory);
        let err = buffer.map(MapAccess::Read).unwrap_err();
        assert_eq!(err.device_error(), Some(DeviceError::OutOfMemory));
        assert!(!soft.is_mapped(handle));

        buffer.upload(0, &[9]).unwrap();
        let mapping = buffer.map(MapAccess::Read).unwrap();
        assert_eq!(mapping.as_slice().unwrap(), &[9, 2, 3, 4]);
    }

    #[test]
    fn ranges_beyond_i32_never_reach_the_device() {
        let (soft, mut buffer) = setup(BufferKind::Vertex);
        let err = buffer.init(i32::MAX as usize + 1).unwrap_err();
        assert_eq!(err.device_error(), Some(DeviceError::InvalidValue));
        assert_eq!(buffer.handle(), 0);
        assert_eq!(soft.live_objects(), 0);

        buffer.init(4).unwrap();
        let calls = soft.call_count();
        let err = buffer.upload(i32::MAX as usize + 1, &[1]).unwrap_err();
        assert_eq!(err.device_error(), Some(DeviceError::InvalidValue));
        assert_eq!(soft.call_count(), calls);
        assert_eq!(soft.buffer_contents(buffer.handle()).unwrap(), vec![0; 4]);
    }

    #[test]
    fn indexed_kinds() {
        assert!(BufferKind::Uniform.is_indexed());
        assert!(BufferKind::ShaderStorage.is_indexed());
        assert!(!BufferKind::Vertex.is_indexed());
        assert!(!BufferKind::Index.is_indexed());
    }

    #[test]
    fn bind_base_needs_indexed_kind() {
        let (soft, mut uniforms) = setup(BufferKind::Uniform);
        uniforms.init(64).unwrap();
        uniforms.bind_base(3).unwrap();
        assert_eq!(soft.indexed_buffer(BufferKind::Uniform, 3), uniforms.handle());

        let mut vertices = Buffer::new(soft.clone(), BufferKind::Vertex);
        vertices.init(16).unwrap();
        let err = vertices.bind_base(0).unwrap_err();
        assert_eq!(err.device_error(), Some(DeviceError::InvalidEnum));
    }

    #[test]
    fn free_mem_is_idempotent() {
        let (soft, mut buffer) = setup(BufferKind::Index);
        buffer.free_mem();
        buffer.init(4).unwrap();
        buffer.free_mem();
        buffer.free_mem();
        assert_eq!(buffer.handle(), 0);
        assert_eq!(soft.live_objects(), 0);
        assert_eq!(soft.get_error(), glow::NO_ERROR);
    }

    #[test]
    fn reinit_releases_previous_allocation() {
        let (soft, mut buffer) = setup(BufferKind::Vertex);
        buffer.init(4).unwrap();
        let first = buffer.handle();
        buffer.init(8).unwrap();
        assert!(!soft.is_buffer(first));
        assert_eq!(soft.live_objects(), 1);
    }
}
