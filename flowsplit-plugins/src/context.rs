//! Per-node filesystem handle passed to explode/rebuild plugins.

use std::fs;
use std::path::PathBuf;

use flowsplit_core::{FlowsplitError, NodeId};

/// The on-disk home for one node's content files and residual JSON (a "NodeDirectory").
/// Plugins use this to read/write sibling files without knowing the
/// tree layout policy (flattened siblings vs. a dedicated subdirectory) chosen by the
/// explode/rebuild engines.
#[derive(Debug, Clone)]
pub struct NodeDirContext {
    /// Directory containing this node's files. The engine creates it before invoking
    /// any explode plugin.
    pub dir: PathBuf,
    pub id: NodeId,
}

impl NodeDirContext {
    pub fn new(dir: PathBuf, id: NodeId) -> Self {
        Self { dir, id }
    }

    /// Path for a sibling file named `<id><extension>` (e.g. `.wrapped.js`).
    pub fn sibling_path(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.id, extension))
    }

    pub fn write_sibling(&self, extension: &str, contents: &[u8]) -> Result<PathBuf, FlowsplitError> {
        fs::create_dir_all(&self.dir).map_err(|e| FlowsplitError::io(&self.dir, e))?;
        let path = self.sibling_path(extension);
        fs::write(&path, contents).map_err(|e| FlowsplitError::io(&path, e))?;
        Ok(path)
    }

    pub fn read_sibling(&self, extension: &str) -> Result<Option<Vec<u8>>, FlowsplitError> {
        let path = self.sibling_path(extension);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FlowsplitError::io(&path, e)),
        }
    }

    pub fn sibling_exists(&self, extension: &str) -> bool {
        self.sibling_path(extension).is_file()
    }

    /// Residual properties path: `<id>.json`.
    pub fn residual_path(&self) -> PathBuf {
        self.sibling_path(".json")
    }
}
