//! Corpus loading: filesystem scan and text extraction.
//!
//! Walks the configured data directory for `.txt`, `.md`, and `.pdf`
//! files and produces normalized [`Document`]s. PDF handling is a thin
//! wrapper over `pdf-extract`; a file that fails extraction is skipped
//! with a warning rather than failing the whole rebuild.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::models::Document;

/// Scan `data_dir` and load every supported document, sorted by path for
/// deterministic ids and rebuilds. A missing or empty directory yields an
/// empty corpus, not an error.
pub fn load_documents(data_dir: &Path) -> Result<Vec<Document>> {
    if !data_dir.exists() {
        warn!(path = %data_dir.display(), "corpus data_dir does not exist");
        return Ok(Vec::new());
    }

    let mut paths: Vec<_> = WalkDir::new(data_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|s| s.to_str()),
                Some("txt") | Some("md") | Some("pdf")
            )
        })
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());

    for path in paths {
        let raw = match extract_text(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable document");
                continue;
            }
        };
        let cleaned = clean_text(&raw);
        if cleaned.is_empty() {
            warn!(path = %path.display(), "skipping empty document");
            continue;
        }

        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string();

        documents.push(Document {
            id: document_id(&path),
            source_path: path.display().to_string(),
            title,
            raw_text: cleaned,
        });
    }

    info!(documents = documents.len(), "corpus loaded");
    Ok(documents)
}

/// Deterministic document id from the source path, so chunk ids stay
/// stable across rebuilds of an unchanged corpus.
fn document_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.display().to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn extract_text(path: &Path) -> Result<String> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("pdf") => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            pdf_extract::extract_text_from_mem(&bytes)
                .with_context(|| format!("PDF extraction failed for {}", path.display()))
        }
        _ => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Collapse all whitespace runs to single spaces.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
