// Shader stage compilation
//
// One `ShaderStage` is one compiled stage object on the device. Sources come
// from memory or from a file; compile diagnostics are returned in the error.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use super::device::{create_object, DeviceRef, Handle};
use crate::error::{Error, Result};

/// Diagnostic logs are cut to this many bytes
pub const LOG_CAPACITY: usize = 512;

/// Pipeline stage a source is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    Vertex,
    Fragment,
}

impl StageKind {
    pub const ALL: [StageKind; 2] = [StageKind::Vertex, StageKind::Fragment];

    /// Token naming the stage in multi-stage files
    pub fn token(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for StageKind {
    type Err = Error;

    /// Exact, case-sensitive match on the stage token
    fn from_str(token: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.token() == token)
            .ok_or_else(|| Error::UnknownStage(token.to_string()))
    }
}

/// Cut a device log to `LOG_CAPACITY` bytes on a character boundary
pub(crate) fn bounded_log(mut log: String) -> String {
    if log.len() > LOG_CAPACITY {
        let mut end = LOG_CAPACITY;
        while !log.is_char_boundary(end) {
            end -= 1;
        }
        log.truncate(end);
    }
    log
}

/// Read a whole text file, checking that every byte the filesystem reports
/// was actually read.
pub(crate) fn read_source(path: &Path) -> Result<String> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let expected = file.metadata().map_err(io_err)?.len() as usize;
    let mut bytes = Vec::with_capacity(expected);
    file.read_to_end(&mut bytes).map_err(io_err)?;
    if bytes.len() != expected {
        return Err(Error::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    String::from_utf8(bytes).map_err(|_| Error::Encoding {
        path: path.to_path_buf(),
    })
}

/// A compiled shader stage.
///
/// When compilation fails the stage keeps the object the device handed out,
/// so dropping it still releases that object.
pub struct ShaderStage {
    device: DeviceRef,
    handle: Handle,
    kind: Option<StageKind>,
}

impl ShaderStage {
    pub fn new(device: DeviceRef) -> Self {
        Self {
            device,
            handle: 0,
            kind: None,
        }
    }

    /// Create and compile a stage in one step
    pub fn compile(device: DeviceRef, source: &str, kind: StageKind) -> Result<Self> {
        let mut stage = Self::new(device);
        stage.load_from_source(source, kind)?;
        Ok(stage)
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> Option<StageKind> {
        self.kind
    }

    /// Compile `source` as a stage of `kind`. Exactly the bytes of the slice
    /// are submitted, so a sub-slice of a larger text compiles on its own.
    pub fn load_from_source(&mut self, source: &str, kind: StageKind) -> Result<()> {
        self.free_mem();
        self.handle = create_object(&*self.device, "shader stage", |d| d.create_shader(kind))?;
        self.kind = Some(kind);

        checked!(self.device, shader_source(self.handle, source));
        checked!(self.device, compile_shader(self.handle));
        if !checked!(self.device, shader_compile_status(self.handle)) {
            let log = self.device.shader_info_log(self.handle);
            return Err(Error::Compile {
                log: bounded_log(log),
            });
        }
        Ok(())
    }

    /// Compile the whole contents of `path`. Compile errors are wrapped with
    /// the path they came from.
    pub fn load_from_file(&mut self, path: impl AsRef<Path>, kind: StageKind) -> Result<()> {
        let path = path.as_ref();
        let source = read_source(path)?;
        self.load_from_source(&source, kind)
            .map_err(|source| Error::InFile {
                path: path.to_path_buf(),
                source: Box::new(source),
            })
    }

    pub fn free_mem(&mut self) {
        if self.handle != 0 {
            self.device.delete_shader(self.handle);
            log::trace!("Released shader stage {}", self.handle);
            self.handle = 0;
        }
    }
}

impl Drop for ShaderStage {
    fn drop(&mut self) {
        self.free_mem();
    }
}

impl fmt::Debug for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderStage")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .finish()
    }
}
