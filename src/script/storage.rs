use crate::error::Result;
use async_trait::async_trait;
use chrono::Local;
use std::path::PathBuf;
use tracing::debug;

/// Where finished scripts are persisted.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Persist script text and return its location.
    async fn save(&self, title: &str, content: &str) -> Result<PathBuf>;
}

/// Stores each script as a plain-text file in a directory.
pub struct FileScriptStore {
    dir: PathBuf,
}

impl FileScriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_name(title: &str) -> String {
        let slug = slugify(title);
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}.txt", slug, stamp, &suffix[..8])
    }
}

#[async_trait]
impl ScriptStore for FileScriptStore {
    async fn save(&self, title: &str, content: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name(title));
        tokio::fs::write(&path, content).await?;
        debug!("Saved script ({} bytes) to {:?}", content.len(), path);
        Ok(path)
    }
}

/// Lower-case, dash-separated file stem limited to 50 characters.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_end_matches('-').chars().take(50).collect();
    if slug.is_empty() {
        "script".to_string()
    } else {
        slug.trim_end_matches('-').to_string()
    }
}
