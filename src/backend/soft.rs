// Software device - headless emulation of the GL state machine
//
// Keeps enough state to behave like a core-profile context: object names,
// target bindings, VAO attribute recording, a sticky error flag, compile and
// link status, uniform tables and texture parameters. No pixels are shaded.
//
// Used by the test suite and by `glcheck`, which has no window to create a
// real context on.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::buffer::{BufferKind, MapAccess};
use super::device::{Device, Handle, TextureParameter, UniformLocation};
use super::draw::{IndexType, PrimitiveMode};
use super::layout::ComponentType;
use super::shader::StageKind;
use super::texture::{MipmapFilter, TextureFilter, TextureFormat, TextureWrap};
use crate::error::DeviceError;

const MAX_VERTEX_ATTRIBS: u32 = 16;
const MAX_BUFFER_BINDINGS: u32 = 16;
const MAX_TEXTURE_UNITS: u32 = 32;

/// Attribute pointer recorded into a vertex array
#[derive(Debug, Clone, PartialEq)]
pub struct AttribState {
    pub buffer: Handle,
    pub count: i32,
    pub ty: ComponentType,
    pub normalized: bool,
    pub stride: i32,
    pub offset: i32,
    pub enabled: bool,
}

/// Value last written to a uniform
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Mat4 { value: [f32; 16], transpose: bool },
    F32(f32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    I32(i32),
}

/// Snapshot of a texture object
#[derive(Debug, Clone, PartialEq)]
pub struct TextureState {
    pub width: u32,
    pub height: u32,
    pub format: Option<TextureFormat>,
    pub pixels: Vec<u8>,
    pub wrap_s: TextureWrap,
    pub wrap_t: TextureWrap,
    pub min_filter: (TextureFilter, MipmapFilter),
    pub mag_filter: TextureFilter,
    pub mipmapped: bool,
}

impl Default for TextureState {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: None,
            pixels: Vec::new(),
            wrap_s: TextureWrap::Repeat,
            wrap_t: TextureWrap::Repeat,
            min_filter: (TextureFilter::Nearest, MipmapFilter::Linear),
            mag_filter: TextureFilter::Linear,
            mipmapped: false,
        }
    }
}

/// A recorded draw call
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub mode: PrimitiveMode,
    pub first: i32,
    pub count: i32,
    pub index_type: Option<IndexType>,
    pub program: Handle,
    pub vertex_array: Handle,
}

#[derive(Default)]
struct SoftBuffer {
    data: Vec<u8>,
    mapped: Option<MapAccess>,
}

#[derive(Default)]
struct VertexArrayState {
    attribs: BTreeMap<u32, AttribState>,
    element_buffer: Handle,
}

struct SoftShader {
    kind: StageKind,
    source: String,
    compiled: bool,
    log: String,
    delete_pending: bool,
}

#[derive(Default)]
struct SoftProgram {
    attached: Vec<Handle>,
    linked: bool,
    log: String,
    uniforms: Vec<String>,
    values: HashMap<u32, UniformValue>,
}

struct Fault {
    remaining: usize,
    error: DeviceError,
}

struct State {
    next_name: Handle,
    error: u32,
    calls: usize,
    fault: Option<Fault>,
    buffers: HashMap<Handle, SoftBuffer>,
    bindings: HashMap<BufferKind, Handle>,
    indexed: HashMap<(BufferKind, u32), Handle>,
    // Handle 0 is the default vertex array, which can't record attributes
    vertex_arrays: HashMap<Handle, VertexArrayState>,
    bound_vertex_array: Handle,
    shaders: HashMap<Handle, SoftShader>,
    programs: HashMap<Handle, SoftProgram>,
    current_program: Handle,
    textures: HashMap<Handle, TextureState>,
    active_unit: u32,
    units: HashMap<u32, Handle>,
    draws: Vec<DrawCall>,
    line_width: f32,
}

impl Default for State {
    fn default() -> Self {
        let mut vertex_arrays = HashMap::new();
        vertex_arrays.insert(0, VertexArrayState::default());
        Self {
            next_name: 1,
            error: glow::NO_ERROR,
            calls: 0,
            fault: None,
            buffers: HashMap::new(),
            bindings: HashMap::new(),
            indexed: HashMap::new(),
            vertex_arrays,
            bound_vertex_array: 0,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            current_program: 0,
            textures: HashMap::new(),
            active_unit: 0,
            units: HashMap::new(),
            draws: Vec::new(),
            line_width: 1.0,
        }
    }
}

impl State {
    /// Count the call and apply a scheduled fault. Returns true when the call
    /// must not take effect.
    fn begin(&mut self) -> bool {
        self.calls += 1;
        let Some(fault) = self.fault.as_mut() else {
            return false;
        };
        if fault.remaining > 0 {
            fault.remaining -= 1;
            return false;
        }
        let error = fault.error;
        self.fault = None;
        self.raise(error);
        true
    }

    /// The first error sticks until read, later ones are dropped
    fn raise(&mut self, error: DeviceError) {
        if self.error == glow::NO_ERROR {
            self.error = error.code();
        }
    }

    fn alloc_name(&mut self) -> Handle {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    fn bound(&self, kind: BufferKind) -> Handle {
        match kind {
            BufferKind::Index => self.vertex_arrays[&self.bound_vertex_array].element_buffer,
            _ => self.bindings.get(&kind).copied().unwrap_or(0),
        }
    }

    fn set_bound(&mut self, kind: BufferKind, buffer: Handle) {
        match kind {
            BufferKind::Index => {
                let vao = self.bound_vertex_array;
                if let Some(state) = self.vertex_arrays.get_mut(&vao) {
                    state.element_buffer = buffer;
                }
            }
            _ => {
                self.bindings.insert(kind, buffer);
            }
        }
    }

    /// Bound buffer for `kind`, raising invalid-operation when there is none
    fn bound_buffer_mut(&mut self, kind: BufferKind) -> Option<&mut SoftBuffer> {
        let handle = self.bound(kind);
        if handle == 0 {
            self.raise(DeviceError::InvalidOperation);
            return None;
        }
        self.buffers.get_mut(&handle)
    }

    fn bound_texture(&self) -> Handle {
        self.units.get(&self.active_unit).copied().unwrap_or(0)
    }

    /// Drop shaders whose deletion was deferred and that are no longer attached
    fn collect_shaders(&mut self) {
        let attached: Vec<Handle> = self
            .programs
            .values()
            .flat_map(|p| p.attached.iter().copied())
            .collect();
        self.shaders
            .retain(|handle, shader| !shader.delete_pending || attached.contains(handle));
    }
}

/// Headless device implementing the [`Device`] trait in memory
#[derive(Default)]
pub struct SoftDevice {
    state: RefCell<State>,
}

impl SoftDevice {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    // =========================================================================
    // FAULT INJECTION
    // =========================================================================

    /// Make the call issued after `calls` further calls fail with `error`.
    /// `fail_after(0, ..)` fails the very next call.
    pub fn fail_after(&self, calls: usize, error: DeviceError) {
        self.state.borrow_mut().fault = Some(Fault { remaining: calls, error });
    }

    /// Number of device calls issued so far
    pub fn call_count(&self) -> usize {
        self.state.borrow().calls
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    pub fn is_buffer(&self, buffer: Handle) -> bool {
        self.state.borrow().buffers.contains_key(&buffer)
    }

    pub fn buffer_contents(&self, buffer: Handle) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&buffer).map(|b| b.data.clone())
    }

    pub fn is_mapped(&self, buffer: Handle) -> bool {
        self.state
            .borrow()
            .buffers
            .get(&buffer)
            .is_some_and(|b| b.mapped.is_some())
    }

    /// Buffer bound to the generic target of `kind`. For `Index` this is the
    /// element buffer of the bound vertex array.
    pub fn bound_buffer(&self, kind: BufferKind) -> Handle {
        self.state.borrow().bound(kind)
    }

    pub fn indexed_buffer(&self, kind: BufferKind, index: u32) -> Handle {
        self.state
            .borrow()
            .indexed
            .get(&(kind, index))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_vertex_array(&self, vao: Handle) -> bool {
        vao != 0 && self.state.borrow().vertex_arrays.contains_key(&vao)
    }

    pub fn bound_vertex_array(&self) -> Handle {
        self.state.borrow().bound_vertex_array
    }

    pub fn attribute(&self, vao: Handle, slot: u32) -> Option<AttribState> {
        self.state
            .borrow()
            .vertex_arrays
            .get(&vao)
            .and_then(|v| v.attribs.get(&slot).cloned())
    }

    pub fn element_buffer(&self, vao: Handle) -> Handle {
        self.state
            .borrow()
            .vertex_arrays
            .get(&vao)
            .map_or(0, |v| v.element_buffer)
    }

    pub fn is_shader(&self, shader: Handle) -> bool {
        self.state
            .borrow()
            .shaders
            .get(&shader)
            .is_some_and(|s| !s.delete_pending)
    }

    pub fn shader_kind(&self, shader: Handle) -> Option<StageKind> {
        self.state.borrow().shaders.get(&shader).map(|s| s.kind)
    }

    pub fn shader_source_text(&self, shader: Handle) -> Option<String> {
        self.state
            .borrow()
            .shaders
            .get(&shader)
            .map(|s| s.source.clone())
    }

    pub fn is_program(&self, program: Handle) -> bool {
        self.state.borrow().programs.contains_key(&program)
    }

    pub fn attached_shaders(&self, program: Handle) -> Vec<Handle> {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|p| p.attached.clone())
            .unwrap_or_default()
    }

    pub fn current_program(&self) -> Handle {
        self.state.borrow().current_program
    }

    pub fn uniform_value(&self, program: Handle, uniform: &str) -> Option<UniformValue> {
        let state = self.state.borrow();
        let program = state.programs.get(&program)?;
        let location = program.uniforms.iter().position(|u| u == uniform)? as u32;
        program.values.get(&location).cloned()
    }

    pub fn texture(&self, texture: Handle) -> Option<TextureState> {
        self.state.borrow().textures.get(&texture).cloned()
    }

    pub fn texture_unit(&self, unit: u32) -> Handle {
        self.state.borrow().units.get(&unit).copied().unwrap_or(0)
    }

    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.state.borrow().draws.clone()
    }

    pub fn current_line_width(&self) -> f32 {
        self.state.borrow().line_width
    }

    /// Objects of every kind still alive on the device
    pub fn live_objects(&self) -> usize {
        let state = self.state.borrow();
        state.buffers.len()
            + (state.vertex_arrays.len() - 1)
            + state.shaders.values().filter(|s| !s.delete_pending).count()
            + state.programs.len()
            + state.textures.len()
    }
}

/// Compile rules: the source needs an entry point and balanced braces
fn compile_source(source: &str) -> Result<(), String> {
    if !source.contains("void main") {
        return Err("0:1(1): error: entry point `main` is not defined".to_string());
    }
    let mut depth = 0i32;
    for (line_no, line) in source.lines().enumerate() {
        let code = line.split("//").next().unwrap_or("");
        for c in code.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err(format!("0:{}(1): error: syntax error, unexpected '}}'", line_no + 1));
            }
        }
    }
    if depth != 0 {
        return Err("0:1(1): error: syntax error, unexpected end of file".to_string());
    }
    Ok(())
}

/// Names of the plain uniforms a stage declares, in declaration order
fn declared_uniforms(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in source.lines() {
        let code = line.split("//").next().unwrap_or("");
        if code.contains('{') {
            continue;
        }
        let tokens: Vec<&str> = code.split_whitespace().collect();
        let Some(at) = tokens.iter().position(|t| *t == "uniform") else {
            continue;
        };
        let Some(last) = tokens.get(at + 2..).and_then(|rest| rest.last()) else {
            continue;
        };
        let name = last
            .trim_end_matches(';')
            .split('[')
            .next()
            .unwrap_or("")
            .to_string();
        if !name.is_empty() {
            names.push(name);
        }
    }
    names
}

impl Device for SoftDevice {
    fn get_error(&self) -> u32 {
        let mut s = self.state.borrow_mut();
        std::mem::replace(&mut s.error, glow::NO_ERROR)
    }

    // =========================================================================
    // BUFFERS
    // =========================================================================

    fn create_buffer(&self) -> std::result::Result<Handle, String> {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return Ok(0);
        }
        let name = s.alloc_name();
        s.buffers.insert(name, SoftBuffer::default());
        Ok(name)
    }

    fn delete_buffer(&self, buffer: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() || s.buffers.remove(&buffer).is_none() {
            return;
        }
        s.bindings.retain(|_, b| *b != buffer);
        s.indexed.retain(|_, b| *b != buffer);
        for vao in s.vertex_arrays.values_mut() {
            if vao.element_buffer == buffer {
                vao.element_buffer = 0;
            }
        }
    }

    fn bind_buffer(&self, kind: BufferKind, buffer: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if buffer != 0 && !s.buffers.contains_key(&buffer) {
            s.raise(DeviceError::InvalidOperation);
            return;
        }
        s.set_bound(kind, buffer);
    }

    fn bind_buffer_base(&self, kind: BufferKind, index: u32, buffer: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if !kind.is_indexed() {
            s.raise(DeviceError::InvalidEnum);
            return;
        }
        if index >= MAX_BUFFER_BINDINGS {
            s.raise(DeviceError::InvalidValue);
            return;
        }
        if buffer != 0 && !s.buffers.contains_key(&buffer) {
            s.raise(DeviceError::InvalidOperation);
            return;
        }
        s.indexed.insert((kind, index), buffer);
        s.set_bound(kind, buffer);
    }

    fn buffer_data(&self, kind: BufferKind, size: usize, data: Option<&[u8]>) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        let error = match s.bound_buffer_mut(kind) {
            None => return,
            Some(buf) if buf.mapped.is_some() => Some(DeviceError::InvalidOperation),
            Some(_) if data.is_some_and(|d| d.len() != size) => Some(DeviceError::InvalidValue),
            Some(buf) => {
                buf.data = data.map_or_else(|| vec![0; size], |d| d.to_vec());
                None
            }
        };
        if let Some(error) = error {
            s.raise(error);
        }
    }

    fn buffer_sub_data(&self, kind: BufferKind, offset: usize, data: &[u8]) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        let error = match s.bound_buffer_mut(kind) {
            None => return,
            Some(buf) if buf.mapped.is_some() => Some(DeviceError::InvalidOperation),
            Some(buf) => match offset.checked_add(data.len()) {
                Some(end) if end <= buf.data.len() => {
                    buf.data[offset..end].copy_from_slice(data);
                    None
                }
                _ => Some(DeviceError::InvalidValue),
            },
        };
        if let Some(error) = error {
            s.raise(error);
        }
    }

    fn map_buffer(&self, kind: BufferKind, length: usize, access: MapAccess) -> *mut u8 {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return std::ptr::null_mut();
        }
        let result = match s.bound_buffer_mut(kind) {
            None => return std::ptr::null_mut(),
            Some(buf) if buf.mapped.is_some() => Err(DeviceError::InvalidOperation),
            Some(buf) if length == 0 || length > buf.data.len() => Err(DeviceError::InvalidValue),
            Some(buf) => {
                buf.mapped = Some(access);
                Ok(buf.data.as_mut_ptr())
            }
        };
        result.unwrap_or_else(|error| {
            s.raise(error);
            std::ptr::null_mut()
        })
    }

    fn unmap_buffer(&self, kind: BufferKind) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        let was_mapped = match s.bound_buffer_mut(kind) {
            None => return,
            Some(buf) => buf.mapped.take().is_some(),
        };
        if !was_mapped {
            s.raise(DeviceError::InvalidOperation);
        }
    }

    // =========================================================================
    // VERTEX ATTRIBUTES AND ARRAYS
    // =========================================================================

    fn vertex_attrib_pointer(
        &self,
        slot: u32,
        count: i32,
        ty: ComponentType,
        normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if slot >= MAX_VERTEX_ATTRIBS || !(1..=4).contains(&count) || stride < 0 {
            s.raise(DeviceError::InvalidValue);
            return;
        }
        let buffer = s.bound(BufferKind::Vertex);
        if s.bound_vertex_array == 0 || (buffer == 0 && offset != 0) {
            s.raise(DeviceError::InvalidOperation);
            return;
        }
        let vao = s.bound_vertex_array;
        let Some(state) = s.vertex_arrays.get_mut(&vao) else {
            return;
        };
        let enabled = state.attribs.get(&slot).is_some_and(|a| a.enabled);
        state.attribs.insert(
            slot,
            AttribState {
                buffer,
                count,
                ty,
                normalized: normalized && ty == ComponentType::Float,
                stride,
                offset,
                enabled,
            },
        );
    }

    fn enable_vertex_attrib_array(&self, slot: u32) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if slot >= MAX_VERTEX_ATTRIBS {
            s.raise(DeviceError::InvalidValue);
            return;
        }
        if s.bound_vertex_array == 0 {
            s.raise(DeviceError::InvalidOperation);
            return;
        }
        let vao = s.bound_vertex_array;
        if let Some(state) = s.vertex_arrays.get_mut(&vao) {
            state
                .attribs
                .entry(slot)
                .or_insert(AttribState {
                    buffer: 0,
                    count: 4,
                    ty: ComponentType::Float,
                    normalized: false,
                    stride: 0,
                    offset: 0,
                    enabled: false,
                })
                .enabled = true;
        }
    }

    fn create_vertex_array(&self) -> std::result::Result<Handle, String> {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return Ok(0);
        }
        let name = s.alloc_name();
        s.vertex_arrays.insert(name, VertexArrayState::default());
        Ok(name)
    }

    fn bind_vertex_array(&self, vao: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if !s.vertex_arrays.contains_key(&vao) {
            s.raise(DeviceError::InvalidOperation);
            return;
        }
        s.bound_vertex_array = vao;
    }

    fn delete_vertex_array(&self, vao: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() || vao == 0 || s.vertex_arrays.remove(&vao).is_none() {
            return;
        }
        if s.bound_vertex_array == vao {
            s.bound_vertex_array = 0;
        }
    }

    // =========================================================================
    // SHADER STAGES AND PROGRAMS
    // =========================================================================

    fn create_shader(&self, kind: StageKind) -> std::result::Result<Handle, String> {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return Ok(0);
        }
        let name = s.alloc_name();
        s.shaders.insert(
            name,
            SoftShader {
                kind,
                source: String::new(),
                compiled: false,
                log: String::new(),
                delete_pending: false,
            },
        );
        Ok(name)
    }

    fn shader_source(&self, shader: Handle, source: &str) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        match s.shaders.get_mut(&shader) {
            Some(sh) => sh.source = source.to_string(),
            None => s.raise(DeviceError::InvalidValue),
        }
    }

    fn compile_shader(&self, shader: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        match s.shaders.get_mut(&shader) {
            Some(sh) => match compile_source(&sh.source) {
                Ok(()) => {
                    sh.compiled = true;
                    sh.log.clear();
                }
                Err(log) => {
                    sh.compiled = false;
                    sh.log = log;
                }
            },
            None => s.raise(DeviceError::InvalidValue),
        }
    }

    fn shader_compile_status(&self, shader: Handle) -> bool {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return false;
        }
        match s.shaders.get(&shader) {
            Some(sh) => sh.compiled,
            None => {
                s.raise(DeviceError::InvalidValue);
                false
            }
        }
    }

    fn shader_info_log(&self, shader: Handle) -> String {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return String::new();
        }
        s.shaders
            .get(&shader)
            .map(|sh| sh.log.clone())
            .unwrap_or_default()
    }

    fn delete_shader(&self, shader: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if let Some(sh) = s.shaders.get_mut(&shader) {
            sh.delete_pending = true;
        }
        s.collect_shaders();
    }

    fn create_program(&self) -> std::result::Result<Handle, String> {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return Ok(0);
        }
        let name = s.alloc_name();
        s.programs.insert(name, SoftProgram::default());
        Ok(name)
    }

    fn attach_shader(&self, program: Handle, shader: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if !s.shaders.contains_key(&shader) {
            s.raise(DeviceError::InvalidValue);
            return;
        }
        let error = match s.programs.get_mut(&program) {
            None => Some(DeviceError::InvalidValue),
            Some(p) if p.attached.contains(&shader) => Some(DeviceError::InvalidOperation),
            Some(p) => {
                p.attached.push(shader);
                None
            }
        };
        if let Some(error) = error {
            s.raise(error);
        }
    }

    fn detach_shader(&self, program: Handle, shader: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        let error = match s.programs.get_mut(&program) {
            None => Some(DeviceError::InvalidValue),
            Some(p) => match p.attached.iter().position(|h| *h == shader) {
                Some(at) => {
                    p.attached.remove(at);
                    None
                }
                None => Some(DeviceError::InvalidOperation),
            },
        };
        match error {
            Some(error) => s.raise(error),
            None => s.collect_shaders(),
        }
    }

    fn link_program(&self, program: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        let Some(attached) = s.programs.get(&program).map(|p| p.attached.clone()) else {
            s.raise(DeviceError::InvalidValue);
            return;
        };

        let stages: Vec<&SoftShader> = attached.iter().filter_map(|h| s.shaders.get(h)).collect();
        let mut failure = None;
        if stages.iter().any(|sh| !sh.compiled) {
            failure = Some("error: linking with uncompiled/unspecialized shader".to_string());
        } else {
            for kind in [StageKind::Vertex, StageKind::Fragment] {
                if !stages.iter().any(|sh| sh.kind == kind) {
                    failure = Some(format!("error: program lacks a {} shader", kind));
                    break;
                }
            }
        }
        let mut uniforms: Vec<String> = Vec::new();
        for name in stages.iter().flat_map(|sh| declared_uniforms(&sh.source)) {
            if !uniforms.contains(&name) {
                uniforms.push(name);
            }
        }

        if let Some(p) = s.programs.get_mut(&program) {
            p.values.clear();
            match failure {
                Some(log) => {
                    p.linked = false;
                    p.log = log;
                    p.uniforms.clear();
                }
                None => {
                    p.linked = true;
                    p.log.clear();
                    p.uniforms = uniforms;
                }
            }
        }
    }

    fn program_link_status(&self, program: Handle) -> bool {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return false;
        }
        match s.programs.get(&program) {
            Some(p) => p.linked,
            None => {
                s.raise(DeviceError::InvalidValue);
                false
            }
        }
    }

    fn program_info_log(&self, program: Handle) -> String {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return String::new();
        }
        s.programs
            .get(&program)
            .map(|p| p.log.clone())
            .unwrap_or_default()
    }

    fn use_program(&self, program: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if program != 0 {
            match s.programs.get(&program) {
                None => {
                    s.raise(DeviceError::InvalidValue);
                    return;
                }
                Some(p) if !p.linked => {
                    s.raise(DeviceError::InvalidOperation);
                    return;
                }
                Some(_) => {}
            }
        }
        s.current_program = program;
    }

    fn delete_program(&self, program: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() || s.programs.remove(&program).is_none() {
            return;
        }
        // Deletion is not deferred while in use; the binding is dropped instead
        if s.current_program == program {
            s.current_program = 0;
        }
        s.collect_shaders();
    }

    // =========================================================================
    // UNIFORMS
    // =========================================================================

    fn uniform_location(&self, program: Handle, uniform: &str) -> Option<UniformLocation> {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return None;
        }
        match s.programs.get(&program) {
            Some(p) if p.linked => p
                .uniforms
                .iter()
                .position(|u| u == uniform)
                .map(|at| UniformLocation(at as u32)),
            Some(_) => {
                s.raise(DeviceError::InvalidOperation);
                None
            }
            None => {
                s.raise(DeviceError::InvalidValue);
                None
            }
        }
    }

    fn uniform_matrix_4(&self, location: Option<UniformLocation>, transpose: bool, value: &[f32; 16]) {
        self.write_uniform(location, UniformValue::Mat4 { value: *value, transpose });
    }

    fn uniform_1_f32(&self, location: Option<UniformLocation>, x: f32) {
        self.write_uniform(location, UniformValue::F32(x));
    }

    fn uniform_3_f32(&self, location: Option<UniformLocation>, x: f32, y: f32, z: f32) {
        self.write_uniform(location, UniformValue::Vec3([x, y, z]));
    }

    fn uniform_4_f32(&self, location: Option<UniformLocation>, x: f32, y: f32, z: f32, w: f32) {
        self.write_uniform(location, UniformValue::Vec4([x, y, z, w]));
    }

    fn uniform_1_i32(&self, location: Option<UniformLocation>, x: i32) {
        self.write_uniform(location, UniformValue::I32(x));
    }

    // =========================================================================
    // TEXTURES
    // =========================================================================

    fn create_texture(&self) -> std::result::Result<Handle, String> {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return Ok(0);
        }
        let name = s.alloc_name();
        s.textures.insert(name, TextureState::default());
        Ok(name)
    }

    fn active_texture(&self, unit: u32) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if unit >= MAX_TEXTURE_UNITS {
            s.raise(DeviceError::InvalidEnum);
            return;
        }
        s.active_unit = unit;
    }

    fn bind_texture_2d(&self, texture: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if texture != 0 && !s.textures.contains_key(&texture) {
            s.raise(DeviceError::InvalidOperation);
            return;
        }
        let unit = s.active_unit;
        s.units.insert(unit, texture);
    }

    fn tex_parameter_2d(&self, parameter: TextureParameter) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        let bound = s.bound_texture();
        let Some(tex) = s.textures.get_mut(&bound) else {
            s.raise(DeviceError::InvalidOperation);
            return;
        };
        match parameter {
            TextureParameter::WrapS(wrap) => tex.wrap_s = wrap,
            TextureParameter::WrapT(wrap) => tex.wrap_t = wrap,
            TextureParameter::MinFilter(filter, mipmap) => tex.min_filter = (filter, mipmap),
            TextureParameter::MagFilter(filter) => tex.mag_filter = filter,
        }
    }

    fn tex_image_2d(&self, format: TextureFormat, width: u32, height: u32, pixels: &[u8]) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        let bound = s.bound_texture();
        let expected = width as usize * height as usize * format.channels() as usize;
        let error = match s.textures.get_mut(&bound) {
            None => Some(DeviceError::InvalidOperation),
            Some(_) if pixels.len() != expected => Some(DeviceError::InvalidValue),
            Some(tex) => {
                tex.width = width;
                tex.height = height;
                tex.format = Some(format);
                tex.pixels = pixels.to_vec();
                tex.mipmapped = false;
                None
            }
        };
        if let Some(error) = error {
            s.raise(error);
        }
    }

    fn generate_mipmap_2d(&self) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        let bound = s.bound_texture();
        match s.textures.get_mut(&bound) {
            Some(tex) if tex.format.is_some() => tex.mipmapped = true,
            _ => s.raise(DeviceError::InvalidOperation),
        }
    }

    fn delete_texture(&self, texture: Handle) {
        let mut s = self.state.borrow_mut();
        if s.begin() || s.textures.remove(&texture).is_none() {
            return;
        }
        s.units.retain(|_, t| *t != texture);
    }

    // =========================================================================
    // DRAWING
    // =========================================================================

    fn draw_arrays(&self, mode: PrimitiveMode, first: i32, count: i32) {
        self.record_draw(mode, first, count, None);
    }

    fn draw_elements(&self, mode: PrimitiveMode, count: i32, index_type: IndexType, offset: i32) {
        self.record_draw(mode, offset, count, Some(index_type));
    }

    fn line_width(&self, width: f32) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if width <= 0.0 {
            s.raise(DeviceError::InvalidValue);
            return;
        }
        s.line_width = width;
    }
}

impl SoftDevice {
    fn write_uniform(&self, location: Option<UniformLocation>, value: UniformValue) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        let Some(UniformLocation(location)) = location else {
            return;
        };
        let current = s.current_program;
        match s.programs.get_mut(&current) {
            Some(p) if (location as usize) < p.uniforms.len() => {
                p.values.insert(location, value);
            }
            _ => s.raise(DeviceError::InvalidOperation),
        }
    }

    fn record_draw(&self, mode: PrimitiveMode, first: i32, count: i32, index_type: Option<IndexType>) {
        let mut s = self.state.borrow_mut();
        if s.begin() {
            return;
        }
        if first < 0 || count < 0 {
            s.raise(DeviceError::InvalidValue);
            return;
        }
        let vao = s.bound_vertex_array;
        if s.current_program == 0 || vao == 0 {
            s.raise(DeviceError::InvalidOperation);
            return;
        }
        // Indexed draws must stay inside the vertex array's index buffer
        if let Some(ty) = index_type {
            let element = s.vertex_arrays.get(&vao).map_or(0, |v| v.element_buffer);
            let available = s.buffers.get(&element).map_or(0, |b| b.data.len());
            let needed = first as usize + count as usize * ty.byte_size();
            if element == 0 || needed > available {
                s.raise(DeviceError::InvalidOperation);
                return;
            }
        }
        let call = DrawCall {
            mode,
            first,
            count,
            index_type,
            program: s.current_program,
            vertex_array: vao,
        };
        s.draws.push(call);
    }
}
