//! On-disk persistence for pending checkpoints.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::runtime::error::{GraphError, GraphResult};
use crate::runtime::executor::Checkpoint;

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Stores at most one pending checkpoint per session under
/// `<root>/<session_id>/checkpoint.json`.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id).join(CHECKPOINT_FILE)
    }

    pub fn save<S: Serialize>(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint<S>,
    ) -> GraphResult<PathBuf> {
        let path = self.path_for(session_id);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|err| GraphError::io(format!("creating {}", dir.display()), err))?;
        }
        let json = serde_json::to_string_pretty(checkpoint)?;
        std::fs::write(&path, json)
            .map_err(|err| GraphError::io(format!("writing {}", path.display()), err))?;
        debug!(session_id, path = %path.display(), "checkpoint saved");
        Ok(path)
    }

    /// `Ok(None)` when the session has nothing pending.
    pub fn load<S: DeserializeOwned>(&self, session_id: &str) -> GraphResult<Option<Checkpoint<S>>> {
        let path = self.path_for(session_id);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(GraphError::io(format!("reading {}", path.display()), err)),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    pub fn clear(&self, session_id: &str) -> GraphResult<()> {
        let path = self.path_for(session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(GraphError::io(format!("removing {}", path.display()), err)),
        }
    }
}
