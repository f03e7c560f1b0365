// Typed uniform blocks
//
// A uniform buffer sized for exactly one `T`, uploaded whole and exposed to
// shaders at a fixed binding point. `T` must follow the std140 layout of the
// block it feeds.

use std::marker::PhantomData;

use bytemuck::Pod;

use super::buffer::{Buffer, BufferKind};
use super::device::{DeviceRef, Handle};
use crate::error::Result;

#[derive(Debug)]
pub struct UniformBlock<T: Pod> {
    buffer: Buffer,
    binding: u32,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBlock<T> {
    pub fn new(device: DeviceRef, binding: u32) -> Self {
        Self {
            buffer: Buffer::new(device, BufferKind::Uniform),
            binding,
            _marker: PhantomData,
        }
    }

    pub fn handle(&self) -> Handle {
        self.buffer.handle()
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }

    /// Allocate the block with `value` and attach it to its binding point
    pub fn init(&mut self, value: &T) -> Result<()> {
        self.buffer.init_with_data(bytemuck::bytes_of(value))?;
        self.buffer.bind_base(self.binding)?;
        self.buffer.unbind()
    }

    /// Replace the whole block
    pub fn update(&mut self, value: &T) -> Result<()> {
        self.buffer.upload(0, bytemuck::bytes_of(value))
    }

    pub fn free_mem(&mut self) {
        self.buffer.free_mem();
    }
}
