// Draw submission against the bound program and vertex array

use super::device::Device;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// Element type of an index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn byte_size(self) -> usize {
        match self {
            Self::U16 => std::mem::size_of::<u16>(),
            Self::U32 => std::mem::size_of::<u32>(),
        }
    }
}

/// Draw `count` vertices starting at `first` from the bound vertex array
pub fn draw_arrays(device: &dyn Device, mode: PrimitiveMode, first: i32, count: i32) -> Result<()> {
    checked!(device, draw_arrays(mode, first, count));
    Ok(())
}

/// Draw `count` indices from the bound vertex array's index buffer, starting
/// `offset` bytes into it
pub fn draw_elements(
    device: &dyn Device,
    mode: PrimitiveMode,
    count: i32,
    index_type: IndexType,
    offset: i32,
) -> Result<()> {
    checked!(device, draw_elements(mode, count, index_type, offset));
    Ok(())
}

pub fn line_width(device: &dyn Device, width: f32) -> Result<()> {
    checked!(device, line_width(width));
    Ok(())
}
