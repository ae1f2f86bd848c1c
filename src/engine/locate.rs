//! Model identifier resolution
//!
//! Turns the configured model identifier into a local GGUF file. The
//! identifier can be:
//! - a `.gguf` file
//! - a directory containing a `.gguf` file
//! - a name under the model directory (with or without `.gguf`)
//! - a Hugging Face repo id (`owner/name`) plus `hf_file`

use std::path::{Path, PathBuf};

use hf_hub::api::sync::Api;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Resolve `config.model` to a local weights file, downloading if needed.
pub fn resolve_model_path(config: &EngineConfig) -> Result<PathBuf> {
    if config.model.trim().is_empty() {
        return Err(EngineError::Load("no model configured".to_string()));
    }

    if let Some(path) = find_local(&config.model, &config.model_dir)? {
        return Ok(path);
    }

    match &config.hf_file {
        Some(file) if looks_like_repo_id(&config.model) => download(&config.model, file),
        _ => Err(EngineError::Load(format!(
            "model not found: {}",
            config.model
        ))),
    }
}

/// Look for the model on disk without touching the network
pub fn find_local(model: &str, model_dir: &Path) -> Result<Option<PathBuf>> {
    let candidates = [
        PathBuf::from(model),
        model_dir.join(model),
        model_dir.join(format!("{}.gguf", model)),
    ];

    for candidate in &candidates {
        if candidate.is_file() {
            return check_gguf(candidate).map(Some);
        }
        if candidate.is_dir() {
            return gguf_in_directory(candidate).map(Some);
        }
    }

    Ok(None)
}

fn check_gguf(path: &Path) -> Result<PathBuf> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("gguf") => Ok(path.to_path_buf()),
        other => Err(EngineError::Load(format!(
            "unsupported model file format: .{}",
            other.unwrap_or("")
        ))),
    }
}

/// First `.gguf` in sorted order
fn gguf_in_directory(dir: &Path) -> Result<PathBuf> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| EngineError::Load(format!("{}: {}", dir.display(), e)))?;

    let mut ggufs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map(|ext| ext == "gguf").unwrap_or(false))
        .collect();
    ggufs.sort();

    if ggufs.len() > 1 {
        tracing::warn!(
            "{} GGUF files in {}, using {}",
            ggufs.len(),
            dir.display(),
            ggufs[0].display()
        );
    }

    ggufs.into_iter().next().ok_or_else(|| {
        EngineError::Load(format!("no .gguf file found in {}", dir.display()))
    })
}

fn looks_like_repo_id(model: &str) -> bool {
    let mut parts = model.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
    )
}

fn download(repo: &str, file: &str) -> Result<PathBuf> {
    tracing::info!("Downloading {} from {}", file, repo);

    let api = Api::new().map_err(|e| EngineError::Load(format!("hub client: {}", e)))?;
    let path = api
        .model(repo.to_string())
        .get(file)
        .map_err(|e| EngineError::Load(format!("download {}/{}: {}", repo, file, e)))?;

    tracing::info!("Downloaded to {}", path.display());
    check_gguf(&path)
}
