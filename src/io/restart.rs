use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::registry::DataStore;
use crate::error::{EngineError, Result};

const RESTART_FORMAT_VERSION: u32 = 1;

/// On-disk restart archive: the processing data store plus enough run state
/// to resume. Payloads are serialised with their class tags, so a mismatched
/// or corrupted archive fails schema checking on read.
#[derive(Debug, Serialize, Deserialize)]
pub struct RestartArchive {
    pub format_version: u32,
    pub written_at: String,
    pub iteration: u64,
    pub contents_version: u64,
    pub store: DataStore,
}

impl RestartArchive {
    pub fn new(iteration: u64, contents_version: u64, store: DataStore) -> Self {
        Self {
            format_version: RESTART_FORMAT_VERSION,
            written_at: chrono::Utc::now().to_rfc3339(),
            iteration,
            contents_version,
            store,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| EngineError::Internal(format!("restart serialisation failed: {}", e)))?;
        fs::write(path, json).map_err(|e| EngineError::Import(format!("cannot write '{}': {}", path.display(), e)))?;
        info!("Restart archive written to '{}' ({} item(s))", path.display(), self.store.len());
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| EngineError::Import(format!("cannot read '{}': {}", path.display(), e)))?;
        let archive: RestartArchive = serde_json::from_str(&text)
            .map_err(|e| EngineError::Import(format!("restart archive '{}' failed schema check: {}", path.display(), e)))?;
        if archive.format_version != RESTART_FORMAT_VERSION {
            return Err(EngineError::Import(format!(
                "restart archive '{}' has format version {} (expected {})",
                path.display(),
                archive.format_version,
                RESTART_FORMAT_VERSION
            )));
        }
        info!(
            "Restart archive read from '{}' (iteration {}, {} item(s))",
            path.display(),
            archive.iteration,
            archive.store.len()
        );
        Ok(archive)
    }
}
