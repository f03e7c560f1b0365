// Stage pipeline - multi-stage source files
//
// One text file holds several stages, each introduced by a marker line:
//
//     #shader vertex
//     ...vertex source...
//     #shader fragment
//     ...fragment source...
//
// Text before the first marker is ignored. A stage's source runs from the
// line after its marker up to the next marker line or the end of the file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use super::device::DeviceRef;
use super::shader::{read_source, ShaderStage, StageKind};
use crate::error::{Error, Result};

const MARKER: &str = "#shader";

/// One stage's source span inside a multi-stage text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSource<'a> {
    pub kind: StageKind,
    pub source: &'a str,
}

/// Token of a marker line, `None` if the line is not a marker
fn marker_token(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix(MARKER)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.split_whitespace().next().unwrap_or(""))
}

/// Split a multi-stage text into its stages, in file order.
///
/// Spans borrow from `text` and never include marker bytes. Duplicate kinds
/// are all returned; an unknown stage token fails the whole split.
pub fn split_stages(text: &str) -> Result<Vec<StageSource<'_>>> {
    // (kind, marker line start, source start)
    let mut markers = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        if let Some(token) = marker_token(line) {
            markers.push((token.parse::<StageKind>()?, start, offset));
        }
    }

    let stages = markers
        .iter()
        .enumerate()
        .map(|(i, &(kind, _, begin))| {
            let end = markers.get(i + 1).map_or(text.len(), |next| next.1);
            StageSource {
                kind,
                source: &text[begin..end],
            }
        })
        .collect();
    Ok(stages)
}

/// Compiled stages of one multi-stage source, at most one per kind
pub struct StagePipeline {
    device: DeviceRef,
    stages: BTreeMap<StageKind, ShaderStage>,
}

impl StagePipeline {
    pub fn new(device: DeviceRef) -> Self {
        Self {
            device,
            stages: BTreeMap::new(),
        }
    }

    /// Read, split and compile the stages in `path`.
    ///
    /// Errors are wrapped with the path. A file without markers gives an
    /// empty pipeline.
    pub fn init(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = read_source(path)?;
        self.init_from_source(&text).map_err(|source| Error::InFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }

    /// Split and compile stages from memory. A later marker of the same kind
    /// replaces the earlier stage.
    pub fn init_from_source(&mut self, text: &str) -> Result<()> {
        self.stages.clear();
        for StageSource { kind, source } in split_stages(text)? {
            let stage = ShaderStage::compile(self.device.clone(), source, kind)?;
            self.stages.insert(kind, stage);
        }
        log::debug!("Compiled {} stage(s)", self.stages.len());
        Ok(())
    }

    pub fn get(&self, kind: StageKind) -> Option<&ShaderStage> {
        self.stages.get(&kind)
    }

    /// Stages ordered by kind
    pub fn stages(&self) -> impl Iterator<Item = &ShaderStage> {
        self.stages.values()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for StagePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.stages.iter()).finish()
    }
}
