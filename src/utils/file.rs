use std::path::Path;

use crate::error::{AppError, Result};

/// Largest recording accepted for submission (base64 inflates it by a third)
pub const MAX_AUDIO_SIZE_MB: u64 = 50;

pub fn get_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_lowercase())
}

pub fn validate_file_size(size: u64, max_size_mb: u64) -> Result<()> {
    let max_bytes = max_size_mb * 1024 * 1024;
    if size > max_bytes {
        return Err(AppError::InvalidInput(format!(
            "file is larger than {} MB",
            max_size_mb
        )));
    }
    Ok(())
}

/// Read a recorded call from disk
pub async fn read_audio_file(path: &Path) -> Result<Vec<u8>> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        AppError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(AppError::InvalidInput(format!(
            "{} is not a file",
            path.display()
        )));
    }
    validate_file_size(metadata.len(), MAX_AUDIO_SIZE_MB)?;

    tokio::fs::read(path)
        .await
        .map_err(|e| AppError::InvalidInput(format!("cannot read {}: {}", path.display(), e)))
}
