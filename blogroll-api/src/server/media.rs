use async_trait::async_trait;
use rand::{Rng, distr::Alphanumeric};
use std::{fmt::Debug, io::ErrorKind, path::PathBuf};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

/// Stored image paths must fit the `image` column.
pub const MEDIA_PATH_MAX_LEN: usize = 100;
const SUFFIX_LEN: usize = 7;
const FALLBACK_NAME: &str = "upload";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Media file could not be written: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaStore: Debug + Send + Sync {
    /// Saves `content` under `directory` and returns the relative path it is
    /// served from. Existing files are never overwritten.
    async fn save(
        &self,
        directory: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<String, MediaError>;

    /// Deletes a file returned by [`MediaStore::save`]. A missing file is
    /// not an error.
    async fn remove(&self, path: &str) -> Result<(), MediaError>;
}

#[derive(Clone, Debug)]
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn save(
        &self,
        directory: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<String, MediaError> {
        let target_dir = self.root.join(directory);
        fs::create_dir_all(&target_dir).await?;

        let budget = MEDIA_PATH_MAX_LEN.saturating_sub(directory.len() + 1 + SUFFIX_LEN + 1);
        let (stem, extension) = sanitize_file_name(file_name, budget);

        let mut candidate = join_name(&stem, None, &extension);
        loop {
            let open = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(target_dir.join(&candidate))
                .await;
            match open {
                Ok(mut file) => {
                    file.write_all(content).await?;
                    file.flush().await?;
                    break;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(%candidate, "Media file name taken, adding suffix");
                    let suffix: String = rand::rng()
                        .sample_iter(&Alphanumeric)
                        .take(SUFFIX_LEN)
                        .map(char::from)
                        .collect();
                    candidate = join_name(&stem, Some(&suffix), &extension);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(format!("{directory}/{candidate}"))
    }

    async fn remove(&self, path: &str) -> Result<(), MediaError> {
        match fs::remove_file(self.root.join(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn join_name(stem: &str, suffix: Option<&str>, extension: &str) -> String {
    let mut name = stem.to_owned();
    if let Some(suffix) = suffix {
        name.push('_');
        name.push_str(suffix);
    }
    name.push_str(extension);
    name
}

/// Reduces an uploaded file name to its last path component with spaces
/// turned into underscores and anything besides word characters, `-` and `.`
/// dropped. Returns the stem and the extension (with its dot), together at
/// most `budget` characters long.
fn sanitize_file_name(file_name: &str, budget: usize) -> (String, String) {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .trim()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|&c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    let (stem, extension) = match cleaned.rfind('.') {
        Some(dot) if dot > 0 => cleaned.split_at(dot),
        _ => (cleaned, ""),
    };
    let extension: String = extension.chars().take(budget / 2).collect();
    let mut stem: String = stem
        .chars()
        .take(budget.saturating_sub(extension.chars().count()))
        .collect();
    if stem.is_empty() {
        stem = FALLBACK_NAME.to_owned();
    }

    (stem, extension)
}

#[cfg(test)]
mod tests {
    use super::{FsMediaStore, MEDIA_PATH_MAX_LEN, MediaStore, sanitize_file_name};

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(
            sanitize_file_name("../../etc/cat pic.gif", 80),
            ("cat_pic".to_owned(), ".gif".to_owned())
        );
        assert_eq!(
            sanitize_file_name("C:\\Users\\me\\b<a>d.png", 80),
            ("bad".to_owned(), ".png".to_owned())
        );
        assert_eq!(
            sanitize_file_name("..", 80),
            ("upload".to_owned(), String::new())
        );
        assert_eq!(
            sanitize_file_name(".hidden", 80),
            ("hidden".to_owned(), String::new())
        );
    }

    #[test]
    fn long_names_are_truncated() {
        let (stem, extension) = sanitize_file_name(&format!("{}.jpeg", "a".repeat(300)), 80);
        assert_eq!(stem.len() + extension.len(), 80);
        assert_eq!(extension, ".jpeg");
    }

    #[tokio::test]
    async fn collisions_get_a_suffix() {
        let root = tempfile::tempdir().unwrap();
        let media = FsMediaStore::new(root.path());

        let first = media.save("posts", "small.gif", b"GIF89a").await.unwrap();
        let second = media.save("posts", "small.gif", b"GIF89a!").await.unwrap();
        assert_eq!(first, "posts/small.gif");
        assert_ne!(first, second);
        assert!(second.starts_with("posts/small_"));
        assert!(second.ends_with(".gif"));

        let stored = std::fs::read(root.path().join(&first)).unwrap();
        assert_eq!(stored, b"GIF89a");
        let stored = std::fs::read(root.path().join(&second)).unwrap();
        assert_eq!(stored, b"GIF89a!");
    }

    #[tokio::test]
    async fn removed_files_are_gone() {
        let root = tempfile::tempdir().unwrap();
        let media = FsMediaStore::new(root.path());

        let path = media.save("posts", "small.gif", b"GIF89a").await.unwrap();
        media.remove(&path).await.unwrap();
        assert!(!root.path().join(&path).exists());
        media.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn saved_paths_fit_the_column() {
        let root = tempfile::tempdir().unwrap();
        let media = FsMediaStore::new(root.path());
        let name = format!("{}.png", "x".repeat(250));

        let first = media.save("posts", &name, b"\x89PNG").await.unwrap();
        let second = media.save("posts", &name, b"\x89PNG").await.unwrap();
        assert!(first.chars().count() <= MEDIA_PATH_MAX_LEN);
        assert!(second.chars().count() <= MEDIA_PATH_MAX_LEN);
    }
}
