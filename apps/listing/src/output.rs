//! Output files: one markdown file per language for every successful candidate.
//!
//! Names are `listing_<id>_<lang>.md` with a random 8-char id shared by both
//! languages of a candidate. Nothing is written until the candidate passed
//! every check.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::errors::AppError;
use crate::models::document::{render_markdown, ListingDocument};
use crate::models::requirement::Requirement;

const FILE_PREFIX: &str = "listing";
const MAX_NAME_ATTEMPTS: usize = 64;

fn new_listing_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub fn listing_path(dir: &Path, id: &str, lang: &str) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}_{id}_{}.md", lang.trim().to_ascii_lowercase()))
}

/// Picks a fresh id for which no file in `langs` exists yet.
pub fn next_paths(dir: &Path, langs: &[&str]) -> Result<Vec<PathBuf>, AppError> {
    for _ in 0..MAX_NAME_ATTEMPTS {
        let id = new_listing_id();
        let paths: Vec<PathBuf> = langs.iter().map(|lang| listing_path(dir, &id, lang)).collect();
        if paths.iter().all(|p| !p.exists()) {
            return Ok(paths);
        }
    }
    Err(AppError::Internal(anyhow::anyhow!(
        "no free output name in {} after {MAX_NAME_ATTEMPTS} attempts",
        dir.display()
    )))
}

/// Renders and writes every `(lang, document)` pair under one fresh id.
pub async fn write_documents(
    dir: &Path,
    req: &Requirement,
    docs: &[(&str, &ListingDocument)],
) -> Result<Vec<PathBuf>, AppError> {
    tokio::fs::create_dir_all(dir).await?;
    let langs: Vec<&str> = docs.iter().map(|(lang, _)| *lang).collect();
    let paths = next_paths(dir, &langs)?;
    for (path, (lang, doc)) in paths.iter().zip(docs) {
        tokio::fs::write(path, render_markdown(lang, req, doc)).await?;
    }
    Ok(paths)
}
