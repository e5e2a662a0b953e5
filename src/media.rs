use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use jiff::civil::Date;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, warn};

use crate::error::{AppResult, CatalogError};

const POSTER_DIR: &str = "avatar";

/// Writes poster uploads under `<root>/avatar/<YYYYMMDD>/`.
#[derive(Clone, Debug)]
pub struct PosterStore {
    root: PathBuf,
    max_bytes: usize,
}

impl PosterStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self { root: root.into(), max_bytes }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn save(&self, filename: &str, bytes: &[u8]) -> AppResult<String> {
        let today: Date = jiff::Zoned::now().into();
        self.save_on(today, filename, bytes).await
    }

    /// Returns the path relative to the media root, with `/` separators.
    pub async fn save_on(&self, date: Date, filename: &str, bytes: &[u8]) -> AppResult<String> {
        if bytes.is_empty() {
            return Err(CatalogError::Validation("poster upload is empty".to_string()).into());
        }
        if bytes.len() > self.max_bytes {
            return Err(CatalogError::Validation(format!(
                "poster exceeds {} bytes",
                self.max_bytes
            ))
            .into());
        }

        let dir = dated_dir(date);
        fs::create_dir_all(self.root.join(&dir)).await?;

        let name = sanitize_filename(filename);
        let (stem, ext) = split_extension(&name);
        for attempt in 0u32.. {
            let candidate = match attempt {
                0 => name.clone(),
                n => format!("{stem}_{n}{ext}"),
            };
            let relative = format!("{dir}/{candidate}");
            let opened = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.root.join(&relative))
                .await;

            match opened {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    info!(path = %relative, bytes = bytes.len(), "poster stored");
                    return Ok(relative);
                },
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(anyhow::anyhow!("no free file name left for {name} in {dir}").into())
    }

    /// Deletes a stored poster. A missing file is not an error.
    pub async fn remove(&self, relative: &str) {
        match fs::remove_file(self.root.join(relative)).await {
            Ok(()) => info!(path = %relative, "poster removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {},
            Err(err) => warn!(path = %relative, error = %err, "could not remove poster"),
        }
    }
}

fn dated_dir(date: Date) -> String {
    format!("{POSTER_DIR}/{}", date.strftime("%Y%m%d"))
}

/// Keeps only the final path component and replaces anything outside
/// `[A-Za-z0-9._-]` with `_`.
fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() { "poster".to_string() } else { cleaned.to_string() }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("moviebo-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn filenames_are_flattened() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\posters\\Inception Poster.jpg"), "Inception_Poster.jpg");
        assert_eq!(sanitize_filename("盗梦空间.png"), "____.png");
        assert_eq!(sanitize_filename(".."), "poster");
        assert_eq!(sanitize_filename(""), "poster");
    }

    #[test]
    fn directory_is_templated_by_date() {
        assert_eq!(dated_dir(jiff::civil::date(2010, 7, 16)), "avatar/20100716");
    }

    #[tokio::test]
    async fn collisions_get_a_suffix() {
        let root = scratch_dir("collide");
        let store = PosterStore::new(&root, 1024);
        let day = jiff::civil::date(2020, 8, 26);

        let first = store.save_on(day, "tenet.jpg", b"one").await.unwrap();
        let second = store.save_on(day, "tenet.jpg", b"two").await.unwrap();

        assert_eq!(first, "avatar/20200826/tenet.jpg");
        assert_eq!(second, "avatar/20200826/tenet_1.jpg");
        assert_eq!(std::fs::read(root.join(&second)).unwrap(), b"two");
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn removed_posters_leave_no_file() {
        let root = scratch_dir("remove");
        let store = PosterStore::new(&root, 1024);
        let day = jiff::civil::date(2014, 11, 7);

        let path = store.save_on(day, "interstellar.jpg", b"poster").await.unwrap();
        store.remove(&path).await;
        assert!(!root.join(&path).exists());

        // Removing again is quiet.
        store.remove(&path).await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn empty_and_oversized_uploads_are_rejected() {
        let store = PosterStore::new(scratch_dir("limits"), 4);

        assert!(store.save("a.jpg", b"").await.is_err());
        assert!(store.save("a.jpg", b"too large").await.is_err());
    }
}
