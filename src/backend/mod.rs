// Backend module - GPU resource layer
//
// Design: every resource owns exactly one device object and talks to the
// device through the `Device` trait, so the same code runs on OpenGL and on
// the headless software device.

#[macro_use]
pub mod device;

pub mod buffer;
pub mod draw;
pub mod layout;
pub mod pipeline;
pub mod program;
pub mod shader;
pub mod soft;
pub mod texture;
pub mod uniform_block;
pub mod vertex_array;

pub use buffer::{Buffer, BufferKind, MapAccess, Mapping};
pub use device::{check, Device, DeviceRef, GlDevice, Handle, UniformLocation};
pub use draw::{draw_arrays, draw_elements, line_width, IndexType, PrimitiveMode};
pub use layout::{AttributeLayout, ComponentType, VertexLayout};
pub use pipeline::{split_stages, StagePipeline, StageSource};
pub use program::{Program, Transposed, Uniform};
pub use shader::{ShaderStage, StageKind};
pub use soft::SoftDevice;
pub use texture::{
    DecodedImage, ImageCrateDecoder, ImageDecoder, MipmapFilter, Texture2D, TextureFilter,
    TextureFormat, TextureOptions, TextureWrap,
};
pub use uniform_block::UniformBlock;
pub use vertex_array::VertexArray;
