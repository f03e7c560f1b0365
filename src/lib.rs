//! GPU resource layer over a GL-style device.
//!
//! Buffers, vertex layouts, shader stages, multi-stage pipelines, programs,
//! vertex arrays and 2D textures, each owning one device object. Every
//! fallible call returns [`Result`]; device errors are read back after each
//! call and the first one is returned.

pub mod backend;
pub mod config;
pub mod error;

pub use backend::*;
pub use error::{DeviceError, Error, Result};
