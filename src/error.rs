// Error types for the resource layer
//
// Every fallible call returns `Result<T>`. Nothing in the layer panics or
// logs an error on the caller's behalf; the caller inspects the value.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Status used for failures that did not come from the device error flag.
pub const GENERIC_STATUS: i32 = -1;

/// Error categories the device reports through its error flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    InvalidEnum,
    InvalidValue,
    InvalidOperation,
    StackOverflow,
    StackUnderflow,
    OutOfMemory,
    InvalidFramebufferOperation,
    ContextLost,
    Unknown(u32),
}

impl DeviceError {
    /// Translate a raw error code. Returns `None` for "no error".
    pub fn from_code(code: u32) -> Option<Self> {
        let err = match code {
            glow::NO_ERROR => return None,
            glow::INVALID_ENUM => Self::InvalidEnum,
            glow::INVALID_VALUE => Self::InvalidValue,
            glow::INVALID_OPERATION => Self::InvalidOperation,
            glow::STACK_OVERFLOW => Self::StackOverflow,
            glow::STACK_UNDERFLOW => Self::StackUnderflow,
            glow::OUT_OF_MEMORY => Self::OutOfMemory,
            glow::INVALID_FRAMEBUFFER_OPERATION => Self::InvalidFramebufferOperation,
            glow::CONTEXT_LOST => Self::ContextLost,
            other => Self::Unknown(other),
        };
        Some(err)
    }

    pub fn code(self) -> u32 {
        match self {
            Self::InvalidEnum => glow::INVALID_ENUM,
            Self::InvalidValue => glow::INVALID_VALUE,
            Self::InvalidOperation => glow::INVALID_OPERATION,
            Self::StackOverflow => glow::STACK_OVERFLOW,
            Self::StackUnderflow => glow::STACK_UNDERFLOW,
            Self::OutOfMemory => glow::OUT_OF_MEMORY,
            Self::InvalidFramebufferOperation => glow::INVALID_FRAMEBUFFER_OPERATION,
            Self::ContextLost => glow::CONTEXT_LOST,
            Self::Unknown(code) => code,
        }
    }

    /// Symbolic name of the error category
    pub fn name(self) -> &'static str {
        match self {
            Self::InvalidEnum => "GL_INVALID_ENUM",
            Self::InvalidValue => "GL_INVALID_VALUE",
            Self::InvalidOperation => "GL_INVALID_OPERATION",
            Self::StackOverflow => "GL_STACK_OVERFLOW",
            Self::StackUnderflow => "GL_STACK_UNDERFLOW",
            Self::OutOfMemory => "GL_OUT_OF_MEMORY",
            Self::InvalidFramebufferOperation => "GL_INVALID_FRAMEBUFFER_OPERATION",
            Self::ContextLost => "GL_CONTEXT_LOST",
            Self::Unknown(_) => "Unknown OpenGL error",
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "{} (0x{:04X})", self.name(), code),
            _ => f.write_str(self.name()),
        }
    }
}

/// The error type of every fallible operation in this crate
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Device errors
    // ========================================================================
    /// The device raised its error flag after a call.
    #[error("OpenGL error: {0}")]
    Device(DeviceError),

    /// The device could not hand out a new object name.
    #[error("Failed to create {object}: {reason}")]
    Create { object: &'static str, reason: String },

    /// Mapping returned no pointer although the error flag stayed clear.
    #[error("Failed to map buffer {handle}")]
    MapFailed { handle: u32 },

    // ========================================================================
    // Compilation and link errors
    // ========================================================================
    #[error("Error in shader code.\n{log}")]
    Compile { log: String },

    #[error("Error while linking shaders code.\n{log}")]
    Link { log: String },

    /// A compile failure with the file it came from.
    #[error("Error: \"{source}\" while compiling shader from file: {}", path.display())]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    // ========================================================================
    // Resource errors
    // ========================================================================
    #[error("Cannot load file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Different number of bytes. Expected: {expected} actual: {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Source is not valid UTF-8: {}", path.display())]
    Encoding { path: PathBuf },

    #[error("Failed to load texture {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Unsupported data format. Channels count is: {0}")]
    UnsupportedChannels(u8),

    // ========================================================================
    // Parse errors
    // ========================================================================
    #[error("Unknown shader type: {0}")]
    UnknownStage(String),
}

impl Error {
    /// Numeric status: the raw device code for device errors, the inner
    /// status for wrapped errors, `GENERIC_STATUS` otherwise.
    pub fn status(&self) -> i32 {
        match self {
            Self::Device(err) => err.code() as i32,
            Self::InFile { source, .. } => source.status(),
            _ => GENERIC_STATUS,
        }
    }

    pub fn device_error(&self) -> Option<DeviceError> {
        match self {
            Self::Device(err) => Some(*err),
            Self::InFile { source, .. } => source.device_error(),
            _ => None,
        }
    }
}

impl From<DeviceError> for Error {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_round_trip() {
        for code in 0x0500..=0x0507u32 {
            let err = DeviceError::from_code(code).unwrap();
            assert_eq!(err.code(), code);
            assert!(!matches!(err, DeviceError::Unknown(_)));
        }
        assert_eq!(DeviceError::from_code(glow::NO_ERROR), None);
    }

    #[test]
    fn unknown_code_keeps_raw_value() {
        let err = DeviceError::from_code(0x1234).unwrap();
        assert_eq!(err, DeviceError::Unknown(0x1234));
        assert!(err.to_string().starts_with("Unknown OpenGL error"));
    }

    #[test]
    fn status_follows_wrapped_error() {
        let inner = Error::Device(DeviceError::InvalidValue);
        let wrapped = Error::InFile {
            path: PathBuf::from("a.glsl"),
            source: Box::new(inner),
        };
        assert_eq!(wrapped.status(), glow::INVALID_VALUE as i32);
        assert_eq!(wrapped.device_error(), Some(DeviceError::InvalidValue));
        assert_eq!(Error::UnknownStage("x".into()).status(), GENERIC_STATUS);
    }

    #[test]
    fn messages_carry_details() {
        let msg = Error::Device(DeviceError::OutOfMemory).to_string();
        assert_eq!(msg, "OpenGL error: GL_OUT_OF_MEMORY");
        assert!(Error::UnsupportedChannels(4).to_string().contains('4'));
    }
}
