use async_trait::async_trait;
use repair_common::{ProgressState, RepairError};
use std::path::PathBuf;

/// Durable home of the repair cursor
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self) -> Result<ProgressState, RepairError>;

    async fn save(&self, state: &ProgressState) -> Result<(), RepairError>;
}

/// Progress kept in a JSON file next to the node settings.
/// Writes go to a sibling temp file first and are renamed into place,
/// so a crash mid-save never leaves a truncated file.
pub struct FileProgressStore {
    path: PathBuf,
}

impl FileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn load(&self) -> Result<ProgressState, RepairError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let state: ProgressState = serde_json::from_str(&raw)?;
        Ok(state)
    }

    async fn save(&self, state: &ProgressState) -> Result<(), RepairError> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::info!(path = %self.path.display(), sync_block = state.sync_block, "Progress saved");
        Ok(())
    }
}
