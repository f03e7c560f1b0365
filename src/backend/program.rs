// Linked shader programs and uniform uploads

use std::fmt;
use std::path::Path;

use glam::{Mat4, Vec3, Vec4};

use super::device::{check, create_object, Device, DeviceRef, Handle, UniformLocation};
use super::pipeline::StagePipeline;
use super::shader::{bounded_log, ShaderStage, StageKind};
use crate::error::{Error, Result};

/// A value that can be written to a uniform location
pub trait Uniform {
    fn write(&self, device: &dyn Device, location: Option<UniformLocation>);
}

/// Matrix uploaded with the transpose flag set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transposed(pub Mat4);

impl Uniform for Mat4 {
    fn write(&self, device: &dyn Device, location: Option<UniformLocation>) {
        device.uniform_matrix_4(location, false, &self.to_cols_array());
    }
}

impl Uniform for Transposed {
    fn write(&self, device: &dyn Device, location: Option<UniformLocation>) {
        device.uniform_matrix_4(location, true, &self.0.to_cols_array());
    }
}

impl Uniform for Vec3 {
    fn write(&self, device: &dyn Device, location: Option<UniformLocation>) {
        device.uniform_3_f32(location, self.x, self.y, self.z);
    }
}

impl Uniform for Vec4 {
    fn write(&self, device: &dyn Device, location: Option<UniformLocation>) {
        device.uniform_4_f32(location, self.x, self.y, self.z, self.w);
    }
}

impl Uniform for f32 {
    fn write(&self, device: &dyn Device, location: Option<UniformLocation>) {
        device.uniform_1_f32(location, *self);
    }
}

impl Uniform for i32 {
    fn write(&self, device: &dyn Device, location: Option<UniformLocation>) {
        device.uniform_1_i32(location, *self);
    }
}

/// A linked program. Holds only the program object; the stages it was built
/// from stay with their owners.
pub struct Program {
    device: DeviceRef,
    handle: Handle,
}

impl Program {
    pub fn new(device: DeviceRef) -> Self {
        Self { device, handle: 0 }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Link every stage of `pipeline`
    pub fn init(&mut self, pipeline: &StagePipeline) -> Result<()> {
        let stages: Vec<&ShaderStage> = pipeline.stages().collect();
        self.init_from_stages(&stages)
    }

    /// Attach `stages`, link, and detach them again once linked.
    ///
    /// On a link failure the stages stay attached so the program can still
    /// be inspected; the error carries the link log.
    pub fn init_from_stages(&mut self, stages: &[&ShaderStage]) -> Result<()> {
        self.free_mem();
        self.handle = create_object(&*self.device, "program", |d| d.create_program())?;

        for stage in stages {
            checked!(self.device, attach_shader(self.handle, stage.handle()));
        }
        checked!(self.device, link_program(self.handle));
        if !checked!(self.device, program_link_status(self.handle)) {
            let log = self.device.program_info_log(self.handle);
            return Err(Error::Link {
                log: bounded_log(log),
            });
        }
        for stage in stages {
            checked!(self.device, detach_shader(self.handle, stage.handle()));
        }
        Ok(())
    }

    /// Compile a vertex and a fragment source and link them
    pub fn init_from_sources(&mut self, vertex: &str, fragment: &str) -> Result<()> {
        let vertex = ShaderStage::compile(self.device.clone(), vertex, StageKind::Vertex)?;
        let fragment = ShaderStage::compile(self.device.clone(), fragment, StageKind::Fragment)?;
        self.init_from_stages(&[&vertex, &fragment])
    }

    /// Compile a vertex and a fragment file and link them
    pub fn init_from_files(
        &mut self,
        vertex_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
    ) -> Result<()> {
        let mut vertex = ShaderStage::new(self.device.clone());
        vertex.load_from_file(vertex_path, StageKind::Vertex)?;
        let mut fragment = ShaderStage::new(self.device.clone());
        fragment.load_from_file(fragment_path, StageKind::Fragment)?;
        self.init_from_stages(&[&vertex, &fragment])
    }

    /// Build from one multi-stage file
    pub fn init_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut pipeline = StagePipeline::new(self.device.clone());
        pipeline.init(path)?;
        self.init(&pipeline)
    }

    /// Write `value` to the uniform `name`.
    ///
    /// The location is looked up in this program but the write goes to the
    /// currently bound program; bind first. An unknown name is ignored.
    pub fn set_uniform<U: Uniform>(&self, name: &str, value: U) -> Result<()> {
        let location = checked!(self.device, uniform_location(self.handle, name));
        value.write(&*self.device, location);
        check(&*self.device)
    }

    pub fn bind(&self) -> Result<()> {
        checked!(self.device, use_program(self.handle));
        Ok(())
    }

    pub fn unbind(&self) -> Result<()> {
        checked!(self.device, use_program(0));
        Ok(())
    }

    pub fn free_mem(&mut self) {
        if self.handle != 0 {
            self.device.delete_program(self.handle);
            log::trace!("Released program {}", self.handle);
            self.handle = 0;
        }
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        self.free_mem();
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::soft::{SoftDevice, UniformValue};
    use crate::error::DeviceError;

    const VERTEX: &str = "uniform mat4 projection;\nuniform vec3 offset;\nvoid main() {}\n";
    const FRAGMENT: &str = "uniform vec4 color;\nuniform float alpha;\nuniform int mode;\nvoid main() {}\n";

    #[test]
    fn linked_program_detaches_stages() {
        let soft = SoftDevice::new();
        let mut program = Program::new(soft.clone());
        program.init_from_sources(VERTEX, FRAGMENT).unwrap();
        assert!(soft.is_program(program.handle()));
        assert!(soft.attached_shaders(program.handle()).is_empty());
        // the temporary stages are gone, only the program remains
        assert_eq!(soft.live_objects(), 1);
    }

    #[test]
    fn uniforms_reach_bound_program() {
        let soft = SoftDevice::new();
        let mut program = Program::new(soft.clone());
        program.init_from_sources(VERTEX, FRAGMENT).unwrap();
        program.bind().unwrap();

        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        program.set_uniform("projection", m).unwrap();
        let h = program.handle();
        assert_eq!(
            soft.uniform_value(h, "projection"),
            Some(UniformValue::Mat4 { value: m.to_cols_array(), transpose: false })
        );

        program.set_uniform("projection", Transposed(m)).unwrap();
        assert!(matches!(
            soft.uniform_value(h, "projection"),
            Some(UniformValue::Mat4 { transpose: true, .. })
        ));

        program.set_uniform("offset", Vec3::new(0.5, 0.0, -0.5)).unwrap();
        program.set_uniform("color", Vec4::ONE).unwrap();
        program.set_uniform("alpha", 0.25f32).unwrap();
        program.set_uniform("mode", 2i32).unwrap();
        assert_eq!(soft.uniform_value(h, "offset"), Some(UniformValue::Vec3([0.5, 0.0, -0.5])));
        assert_eq!(soft.uniform_value(h, "color"), Some(UniformValue::Vec4([1.0; 4])));
        assert_eq!(soft.uniform_value(h, "alpha"), Some(UniformValue::F32(0.25)));
        assert_eq!(soft.uniform_value(h, "mode"), Some(UniformValue::I32(2)));
    }

    #[test]
    fn unknown_uniform_is_ignored() {
        let soft = SoftDevice::new();
        let mut program = Program::new(soft.clone());
        program.init_from_sources(VERTEX, FRAGMENT).unwrap();
        program.bind().unwrap();
        program.set_uniform("missing", 1.0f32).unwrap();
    }

    #[test]
    fn uniform_without_bound_program_fails() {
        let soft = SoftDevice::new();
        let mut program = Program::new(soft);
        program.init_from_sources(VERTEX, FRAGMENT).unwrap();
        let err = program.set_uniform("alpha", 1.0f32).unwrap_err();
        assert_eq!(err.device_error(), Some(DeviceError::InvalidOperation));
    }

    #[test]
    fn link_failure_keeps_stages_attached() {
        let soft = SoftDevice::new();
        let vertex = ShaderStage::compile(soft.clone(), VERTEX, StageKind::Vertex).unwrap();
        let mut program = Program::new(soft.clone());
        let err = program.init_from_stages(&[&vertex]).unwrap_err();
        match &err {
            Error::Link { log } => assert!(log.contains("fragment")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(soft.attached_shaders(program.handle()), vec![vertex.handle()]);
        assert!(soft.is_shader(vertex.handle()));
    }

    #[test]
    fn free_mem_twice() {
        let soft = SoftDevice::new();
        let mut program = Program::new(soft.clone());
        program.free_mem();
        program.init_from_sources(VERTEX, FRAGMENT).unwrap();
        program.free_mem();
        program.free_mem();
        assert_eq!(soft.live_objects(), 0);
        assert_eq!(soft.get_error(), glow::NO_ERROR);
    }
}
