// Device - the graphics entry points the resource layer issues
//
// Responsibilities:
// - One object-safe trait over raw handles so resources don't care which
//   backend they run on
// - OpenGL implementation on top of glow
// - Error-flag checking after every state-changing call

use std::num::NonZeroU32;
use std::rc::Rc;

use glow::HasContext;

use super::buffer::{BufferKind, MapAccess};
use super::draw::{IndexType, PrimitiveMode};
use super::layout::ComponentType;
use super::shader::StageKind;
use super::texture::{MipmapFilter, TextureFilter, TextureFormat, TextureWrap};
use crate::error::{DeviceError, Error, Result};

/// Opaque device object name. `0` means "no object".
pub type Handle = u32;

/// Shared, thread-affine reference to the device every resource talks to
pub type DeviceRef = Rc<dyn Device>;

/// Location of a uniform inside a linked program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Sampling state of the currently bound 2D texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureParameter {
    WrapS(TextureWrap),
    WrapT(TextureWrap),
    MinFilter(TextureFilter, MipmapFilter),
    MagFilter(TextureFilter),
}

/// Device entry points.
///
/// Calls mirror the underlying API one to one and never report failure
/// directly: errors are raised on the device's error flag and read back with
/// [`Device::get_error`]. The only exceptions are the `create_*` calls, which
/// report a failure to hand out a name as `Err`.
///
/// A device is bound to the thread its context is current on.
pub trait Device {
    /// Read and clear the error flag. Returns `glow::NO_ERROR` when clear.
    fn get_error(&self) -> u32;

    // Buffers
    fn create_buffer(&self) -> std::result::Result<Handle, String>;
    fn delete_buffer(&self, buffer: Handle);
    fn bind_buffer(&self, kind: BufferKind, buffer: Handle);
    fn bind_buffer_base(&self, kind: BufferKind, index: u32, buffer: Handle);
    /// Allocate storage for the bound buffer, copying `data` when given.
    fn buffer_data(&self, kind: BufferKind, size: usize, data: Option<&[u8]>);
    fn buffer_sub_data(&self, kind: BufferKind, offset: usize, data: &[u8]);
    /// Map `length` bytes of the bound buffer. Null on failure.
    fn map_buffer(&self, kind: BufferKind, length: usize, access: MapAccess) -> *mut u8;
    fn unmap_buffer(&self, kind: BufferKind);

    // Vertex attributes and arrays
    fn vertex_attrib_pointer(
        &self,
        slot: u32,
        count: i32,
        ty: ComponentType,
        normalized: bool,
        stride: i32,
        offset: i32,
    );
    fn enable_vertex_attrib_array(&self, slot: u32);
    fn create_vertex_array(&self) -> std::result::Result<Handle, String>;
    fn bind_vertex_array(&self, vao: Handle);
    fn delete_vertex_array(&self, vao: Handle);

    // Shader stages and programs
    fn create_shader(&self, kind: StageKind) -> std::result::Result<Handle, String>;
    fn shader_source(&self, shader: Handle, source: &str);
    fn compile_shader(&self, shader: Handle);
    fn shader_compile_status(&self, shader: Handle) -> bool;
    fn shader_info_log(&self, shader: Handle) -> String;
    fn delete_shader(&self, shader: Handle);
    fn create_program(&self) -> std::result::Result<Handle, String>;
    fn attach_shader(&self, program: Handle, shader: Handle);
    fn detach_shader(&self, program: Handle, shader: Handle);
    fn link_program(&self, program: Handle);
    fn program_link_status(&self, program: Handle) -> bool;
    fn program_info_log(&self, program: Handle) -> String;
    fn use_program(&self, program: Handle);
    fn delete_program(&self, program: Handle);

    // Uniforms. A `None` location is silently ignored.
    fn uniform_location(&self, program: Handle, name: &str) -> Option<UniformLocation>;
    fn uniform_matrix_4(&self, location: Option<UniformLocation>, transpose: bool, value: &[f32; 16]);
    fn uniform_1_f32(&self, location: Option<UniformLocation>, x: f32);
    fn uniform_3_f32(&self, location: Option<UniformLocation>, x: f32, y: f32, z: f32);
    fn uniform_4_f32(&self, location: Option<UniformLocation>, x: f32, y: f32, z: f32, w: f32);
    fn uniform_1_i32(&self, location: Option<UniformLocation>, x: i32);

    // 2D textures
    fn create_texture(&self) -> std::result::Result<Handle, String>;
    fn active_texture(&self, unit: u32);
    fn bind_texture_2d(&self, texture: Handle);
    fn tex_parameter_2d(&self, parameter: TextureParameter);
    fn tex_image_2d(&self, format: TextureFormat, width: u32, height: u32, pixels: &[u8]);
    fn generate_mipmap_2d(&self);
    fn delete_texture(&self, texture: Handle);

    // Drawing
    fn draw_arrays(&self, mode: PrimitiveMode, first: i32, count: i32);
    fn draw_elements(&self, mode: PrimitiveMode, count: i32, index_type: IndexType, offset: i32);
    fn line_width(&self, width: f32);
}

/// Read the device error flag and turn it into a `Result`
pub fn check(device: &dyn Device) -> Result<()> {
    match DeviceError::from_code(device.get_error()) {
        Some(err) => Err(Error::Device(err)),
        None => Ok(()),
    }
}

/// Issue a device call and return early on the first raised error.
///
/// `checked!(device, bind_buffer(kind, handle))` evaluates to the call's
/// return value.
macro_rules! checked {
    ($device:expr, $call:ident($($arg:expr),* $(,)?)) => {{
        let out = $device.$call($($arg),*);
        $crate::backend::device::check(&*$device)?;
        out
    }};
}

/// Allocate a new object name, checking both the call result and the flag
pub(crate) fn create_object(
    device: &dyn Device,
    object: &'static str,
    create: impl FnOnce(&dyn Device) -> std::result::Result<Handle, String>,
) -> Result<Handle> {
    let handle = create(device).map_err(|reason| Error::Create { object, reason })?;
    check(device)?;
    log::debug!("Created {} {}", object, handle);
    Ok(handle)
}

// =============================================================================
// OPENGL BACKEND
// =============================================================================

/// OpenGL device backed by a glow context
pub struct GlDevice {
    gl: glow::Context,
}

impl GlDevice {
    /// Wrap an existing glow context.
    ///
    /// # Safety
    /// The context must be current on the calling thread for as long as the
    /// device and any resource created from it are alive.
    pub unsafe fn new(gl: glow::Context) -> Rc<Self> {
        Rc::new(Self { gl })
    }

    /// Load the entry points through the windowing layer's loader.
    ///
    /// # Safety
    /// Same requirements as [`GlDevice::new`].
    pub unsafe fn from_loader_function<F>(loader: F) -> Rc<Self>
    where
        F: FnMut(&str) -> *const std::ffi::c_void,
    {
        Self::new(glow::Context::from_loader_function(loader))
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }
}

fn buffer_target(kind: BufferKind) -> u32 {
    match kind {
        BufferKind::Vertex => glow::ARRAY_BUFFER,
        BufferKind::Index => glow::ELEMENT_ARRAY_BUFFER,
        BufferKind::Uniform => glow::UNIFORM_BUFFER,
        BufferKind::ShaderStorage => glow::SHADER_STORAGE_BUFFER,
    }
}

fn component_type(ty: ComponentType) -> u32 {
    match ty {
        ComponentType::Int => glow::INT,
        ComponentType::Float => glow::FLOAT,
    }
}

fn shader_type(kind: StageKind) -> u32 {
    match kind {
        StageKind::Vertex => glow::VERTEX_SHADER,
        StageKind::Fragment => glow::FRAGMENT_SHADER,
    }
}

fn map_access(access: MapAccess) -> u32 {
    match access {
        MapAccess::Read => glow::MAP_READ_BIT,
        MapAccess::Write => glow::MAP_WRITE_BIT,
        MapAccess::ReadWrite => glow::MAP_READ_BIT | glow::MAP_WRITE_BIT,
    }
}

fn texture_wrap(wrap: TextureWrap) -> i32 {
    (match wrap {
        TextureWrap::Repeat => glow::REPEAT,
        TextureWrap::Clamp => glow::CLAMP_TO_EDGE,
    }) as i32
}

fn texture_filter(filter: TextureFilter) -> i32 {
    (match filter {
        TextureFilter::Nearest => glow::NEAREST,
        TextureFilter::Linear => glow::LINEAR,
    }) as i32
}

fn min_filter(filter: TextureFilter, mipmap: MipmapFilter) -> i32 {
    (match (filter, mipmap) {
        (_, MipmapFilter::None) => return texture_filter(filter),
        (TextureFilter::Nearest, MipmapFilter::Nearest) => glow::NEAREST_MIPMAP_NEAREST,
        (TextureFilter::Nearest, MipmapFilter::Linear) => glow::NEAREST_MIPMAP_LINEAR,
        (TextureFilter::Linear, MipmapFilter::Nearest) => glow::LINEAR_MIPMAP_NEAREST,
        (TextureFilter::Linear, MipmapFilter::Linear) => glow::LINEAR_MIPMAP_LINEAR,
    }) as i32
}

fn texture_format(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::Rgb => glow::RGB,
    }
}

fn primitive_mode(mode: PrimitiveMode) -> u32 {
    match mode {
        PrimitiveMode::Points => glow::POINTS,
        PrimitiveMode::Lines => glow::LINES,
        PrimitiveMode::LineStrip => glow::LINE_STRIP,
        PrimitiveMode::LineLoop => glow::LINE_LOOP,
        PrimitiveMode::Triangles => glow::TRIANGLES,
        PrimitiveMode::TriangleStrip => glow::TRIANGLE_STRIP,
        PrimitiveMode::TriangleFan => glow::TRIANGLE_FAN,
    }
}

fn index_type(ty: IndexType) -> u32 {
    match ty {
        IndexType::U16 => glow::UNSIGNED_SHORT,
        IndexType::U32 => glow::UNSIGNED_INT,
    }
}

fn name(handle: Handle) -> Option<NonZeroU32> {
    NonZeroU32::new(handle)
}

// Safety for every call below: `GlDevice::new` requires the context to be
// current on this thread for the device's lifetime.
impl Device for GlDevice {
    fn get_error(&self) -> u32 {
        unsafe { self.gl.get_error() }
    }

    fn create_buffer(&self) -> std::result::Result<Handle, String> {
        unsafe { self.gl.create_buffer() }.map(|b| b.0.get())
    }

    fn delete_buffer(&self, buffer: Handle) {
        if let Some(n) = name(buffer) {
            unsafe { self.gl.delete_buffer(glow::NativeBuffer(n)) }
        }
    }

    fn bind_buffer(&self, kind: BufferKind, buffer: Handle) {
        unsafe {
            self.gl
                .bind_buffer(buffer_target(kind), name(buffer).map(glow::NativeBuffer))
        }
    }

    fn bind_buffer_base(&self, kind: BufferKind, index: u32, buffer: Handle) {
        unsafe {
            self.gl.bind_buffer_base(
                buffer_target(kind),
                index,
                name(buffer).map(glow::NativeBuffer),
            )
        }
    }

    fn buffer_data(&self, kind: BufferKind, size: usize, data: Option<&[u8]>) {
        let target = buffer_target(kind);
        unsafe {
            match data {
                Some(bytes) => self.gl.buffer_data_u8_slice(target, bytes, glow::STATIC_DRAW),
                None => self.gl.buffer_data_size(target, size as i32, glow::STATIC_DRAW),
            }
        }
    }

    fn buffer_sub_data(&self, kind: BufferKind, offset: usize, data: &[u8]) {
        unsafe {
            self.gl
                .buffer_sub_data_u8_slice(buffer_target(kind), offset as i32, data)
        }
    }

    fn map_buffer(&self, kind: BufferKind, length: usize, access: MapAccess) -> *mut u8 {
        unsafe {
            self.gl
                .map_buffer_range(buffer_target(kind), 0, length as i32, map_access(access))
        }
    }

    fn unmap_buffer(&self, kind: BufferKind) {
        unsafe { self.gl.unmap_buffer(buffer_target(kind)) }
    }

    fn vertex_attrib_pointer(
        &self,
        slot: u32,
        count: i32,
        ty: ComponentType,
        normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        let data_type = component_type(ty);
        unsafe {
            match ty {
                ComponentType::Int => self
                    .gl
                    .vertex_attrib_pointer_i32(slot, count, data_type, stride, offset),
                ComponentType::Float => self
                    .gl
                    .vertex_attrib_pointer_f32(slot, count, data_type, normalized, stride, offset),
            }
        }
    }

    fn enable_vertex_attrib_array(&self, slot: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(slot) }
    }

    fn create_vertex_array(&self) -> std::result::Result<Handle, String> {
        unsafe { self.gl.create_vertex_array() }.map(|v| v.0.get())
    }

    fn bind_vertex_array(&self, vao: Handle) {
        unsafe { self.gl.bind_vertex_array(name(vao).map(glow::NativeVertexArray)) }
    }

    fn delete_vertex_array(&self, vao: Handle) {
        if let Some(n) = name(vao) {
            unsafe { self.gl.delete_vertex_array(glow::NativeVertexArray(n)) }
        }
    }

    fn create_shader(&self, kind: StageKind) -> std::result::Result<Handle, String> {
        unsafe { self.gl.create_shader(shader_type(kind)) }.map(|s| s.0.get())
    }

    fn shader_source(&self, shader: Handle, source: &str) {
        if let Some(n) = name(shader) {
            unsafe { self.gl.shader_source(glow::NativeShader(n), source) }
        }
    }

    fn compile_shader(&self, shader: Handle) {
        if let Some(n) = name(shader) {
            unsafe { self.gl.compile_shader(glow::NativeShader(n)) }
        }
    }

    fn shader_compile_status(&self, shader: Handle) -> bool {
        name(shader)
            .map(|n| unsafe { self.gl.get_shader_compile_status(glow::NativeShader(n)) })
            .unwrap_or(false)
    }

    fn shader_info_log(&self, shader: Handle) -> String {
        name(shader)
            .map(|n| unsafe { self.gl.get_shader_info_log(glow::NativeShader(n)) })
            .unwrap_or_default()
    }

    fn delete_shader(&self, shader: Handle) {
        if let Some(n) = name(shader) {
            unsafe { self.gl.delete_shader(glow::NativeShader(n)) }
        }
    }

    fn create_program(&self) -> std::result::Result<Handle, String> {
        unsafe { self.gl.create_program() }.map(|p| p.0.get())
    }

    fn attach_shader(&self, program: Handle, shader: Handle) {
        if let (Some(p), Some(s)) = (name(program), name(shader)) {
            unsafe {
                self.gl
                    .attach_shader(glow::NativeProgram(p), glow::NativeShader(s))
            }
        }
    }

    fn detach_shader(&self, program: Handle, shader: Handle) {
        if let (Some(p), Some(s)) = (name(program), name(shader)) {
            unsafe {
                self.gl
                    .detach_shader(glow::NativeProgram(p), glow::NativeShader(s))
            }
        }
    }

    fn link_program(&self, program: Handle) {
        if let Some(n) = name(program) {
            unsafe { self.gl.link_program(glow::NativeProgram(n)) }
        }
    }

    fn program_link_status(&self, program: Handle) -> bool {
        name(program)
            .map(|n| unsafe { self.gl.get_program_link_status(glow::NativeProgram(n)) })
            .unwrap_or(false)
    }

    fn program_info_log(&self, program: Handle) -> String {
        name(program)
            .map(|n| unsafe { self.gl.get_program_info_log(glow::NativeProgram(n)) })
            .unwrap_or_default()
    }

    fn use_program(&self, program: Handle) {
        unsafe { self.gl.use_program(name(program).map(glow::NativeProgram)) }
    }

    fn delete_program(&self, program: Handle) {
        if let Some(n) = name(program) {
            unsafe { self.gl.delete_program(glow::NativeProgram(n)) }
        }
    }

    fn uniform_location(&self, program: Handle, uniform: &str) -> Option<UniformLocation> {
        let program = glow::NativeProgram(name(program)?);
        unsafe { self.gl.get_uniform_location(program, uniform) }.map(|l| UniformLocation(l.0))
    }

    fn uniform_matrix_4(&self, location: Option<UniformLocation>, transpose: bool, value: &[f32; 16]) {
        let location = location.map(|l| glow::NativeUniformLocation(l.0));
        unsafe {
            self.gl
                .uniform_matrix_4_f32_slice(location.as_ref(), transpose, value)
        }
    }

    fn uniform_1_f32(&self, location: Option<UniformLocation>, x: f32) {
        let location = location.map(|l| glow::NativeUniformLocation(l.0));
        unsafe { self.gl.uniform_1_f32(location.as_ref(), x) }
    }

    fn uniform_3_f32(&self, location: Option<UniformLocation>, x: f32, y: f32, z: f32) {
        let location = location.map(|l| glow::NativeUniformLocation(l.0));
        unsafe { self.gl.uniform_3_f32(location.as_ref(), x, y, z) }
    }

    fn uniform_4_f32(&self, location: Option<UniformLocation>, x: f32, y: f32, z: f32, w: f32) {
        let location = location.map(|l| glow::NativeUniformLocation(l.0));
        unsafe { self.gl.uniform_4_f32(location.as_ref(), x, y, z, w) }
    }

    fn uniform_1_i32(&self, location: Option<UniformLocation>, x: i32) {
        let location = location.map(|l| glow::NativeUniformLocation(l.0));
        unsafe { self.gl.uniform_1_i32(location.as_ref(), x) }
    }

    fn create_texture(&self) -> std::result::Result<Handle, String> {
        unsafe { self.gl.create_texture() }.map(|t| t.0.get())
    }

    fn active_texture(&self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) }
    }

    fn bind_texture_2d(&self, texture: Handle) {
        unsafe {
            self.gl
                .bind_texture(glow::TEXTURE_2D, name(texture).map(glow::NativeTexture))
        }
    }

    fn tex_parameter_2d(&self, parameter: TextureParameter) {
        let (pname, value) = match parameter {
            TextureParameter::WrapS(wrap) => (glow::TEXTURE_WRAP_S, texture_wrap(wrap)),
            TextureParameter::WrapT(wrap) => (glow::TEXTURE_WRAP_T, texture_wrap(wrap)),
            TextureParameter::MinFilter(filter, mipmap) => {
                (glow::TEXTURE_MIN_FILTER, min_filter(filter, mipmap))
            }
            TextureParameter::MagFilter(filter) => (glow::TEXTURE_MAG_FILTER, texture_filter(filter)),
        };
        unsafe { self.gl.tex_parameter_i32(glow::TEXTURE_2D, pname, value) }
    }

    fn tex_image_2d(&self, format: TextureFormat, width: u32, height: u32, pixels: &[u8]) {
        let format = texture_format(format);
        unsafe {
            // Tightly packed 3-channel rows are not 4-byte aligned
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                format as i32,
                width as i32,
                height as i32,
                0,
                format,
                glow::UNSIGNED_BYTE,
                Some(pixels),
            );
        }
    }

    fn generate_mipmap_2d(&self) {
        unsafe { self.gl.generate_mipmap(glow::TEXTURE_2D) }
    }

    fn delete_texture(&self, texture: Handle) {
        if let Some(n) = name(texture) {
            unsafe { self.gl.delete_texture(glow::NativeTexture(n)) }
        }
    }

    fn draw_arrays(&self, mode: PrimitiveMode, first: i32, count: i32) {
        unsafe { self.gl.draw_arrays(primitive_mode(mode), first, count) }
    }

    fn draw_elements(&self, mode: PrimitiveMode, count: i32, ty: IndexType, offset: i32) {
        unsafe {
            self.gl
                .draw_elements(primitive_mode(mode), count, index_type(ty), offset)
        }
    }

    fn line_width(&self, width: f32) {
        unsafe { self.gl.line_width(width) }
    }
}
