//! Output of the final code block.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::agent::code::CodeBlock;
use crate::runtime::error::{GraphError, GraphResult};

/// Persists a finished code block somewhere outside the conversation.
pub trait CodeWriter: Send + Sync {
    fn write(&self, block: &CodeBlock) -> GraphResult<PathBuf>;
}

/// Writes `imports`, a blank line, then `code` to a fixed path.
#[derive(Clone, Debug)]
pub struct FileCodeWriter {
    path: PathBuf,
}

impl FileCodeWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CodeWriter for FileCodeWriter {
    fn write(&self, block: &CodeBlock) -> GraphResult<PathBuf> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| GraphError::io(format!("creating {}", parent.display()), err))?;
        }
        fs::write(&self.path, block.file_contents())
            .map_err(|err| GraphError::io(format!("writing {}", self.path.display()), err))?;
        info!(path = %self.path.display(), "wrote generated code");
        Ok(self.path.clone())
    }
}
