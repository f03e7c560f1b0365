// Vertex array objects
//
// While a vertex array is bound, buffer layouts and the index buffer binding
// are recorded into it. It never owns those buffers: a buffer must outlive
// every vertex array that recorded it.

use std::fmt;

use super::device::{create_object, DeviceRef, Handle};
use crate::error::Result;

pub struct VertexArray {
    device: DeviceRef,
    handle: Handle,
}

impl VertexArray {
    pub fn new(device: DeviceRef) -> Self {
        Self { device, handle: 0 }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn init(&mut self) -> Result<()> {
        self.free_mem();
        self.handle = create_object(&*self.device, "vertex array", |d| d.create_vertex_array())?;
        Ok(())
    }

    pub fn bind(&self) -> Result<()> {
        checked!(self.device, bind_vertex_array(self.handle));
        Ok(())
    }

    pub fn unbind(&self) -> Result<()> {
        checked!(self.device, bind_vertex_array(0));
        Ok(())
    }

    /// Unbind, then release. Safe to call repeatedly.
    pub fn free_mem(&mut self) {
        if self.handle != 0 {
            self.device.bind_vertex_array(0);
            self.device.delete_vertex_array(self.handle);
            log::trace!("Released vertex array {}", self.handle);
            self.handle = 0;
        }
    }
}

impl Drop for VertexArray {
    fn drop(&mut self) {
        self.free_mem();
    }
}

impl fmt::Debug for VertexArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexArray").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffer::{Buffer, BufferKind};
    use crate::backend::device::Device;
    use crate::backend::soft::SoftDevice;

    #[test]
    fn records_index_buffer_while_bound() {
        let soft = SoftDevice::new();
        let mut vao = VertexArray::new(soft.clone());
        vao.init().unwrap();
        vao.bind().unwrap();

        let mut indices = Buffer::new(soft.clone(), BufferKind::Index);
        indices.init_with_data(bytemuck::cast_slice(&[0u32, 1, 2])).unwrap();
        indices.bind().unwrap();
        vao.unbind().unwrap();

        assert_eq!(soft.element_buffer(vao.handle()), indices.handle());
        assert_eq!(soft.bound_vertex_array(), 0);
    }

    #[test]
    fn free_mem_unbinds_and_is_idempotent() {
        let soft = SoftDevice::new();
        let mut vao = VertexArray::new(soft.clone());
        vao.free_mem();
        vao.init().unwrap();
        vao.bind().unwrap();
        let handle = vao.handle();
        assert!(soft.is_vertex_array(handle));
        vao.free_mem();
        vao.free_mem();
        assert!(!soft.is_vertex_array(handle));
        assert_eq!(soft.bound_vertex_array(), 0);
        assert_eq!(soft.live_objects(), 0);
        assert_eq!(soft.get_error(), glow::NO_ERROR);
    }

    #[test]
    fn binding_released_array_is_reported() {
        let soft = SoftDevice::new();
        let mut vao = VertexArray::new(soft.clone());
        vao.init().unwrap();
        let stale = vao.handle();
        vao.free_mem();
        soft.bind_vertex_array(stale);
        assert_eq!(soft.get_error(), glow::INVALID_OPERATION);
    }
}
