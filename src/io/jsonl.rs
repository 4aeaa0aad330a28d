//! Append-only JSONL writer shared by history and notification sinks

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Appends one JSON object per line to a file
#[derive(Debug, Clone)]
pub struct JsonlWriter {
    path: PathBuf,
}

impl JsonlWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize a record and append it as a line
    pub fn append<T: Serialize>(&self, record: &T) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        self.append_line(&line)?;
        Ok(())
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        // Create parent directories if they don't exist
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.path.display(), bytes = %line.len(), "jsonl_written");

        Ok(())
    }
}
