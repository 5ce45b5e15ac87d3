//! Local filesystem endpoint (§4.B).
//!
//! Writes land atomically: content streams to a sibling temp file under the
//! same parent directory, then an OS rename replaces the target in one step
//! (§4.G), so a concurrent reader never observes a partial file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{AdapterCapabilities, BoxedReader, StorageAdapter};
use crate::error::{EngineError, Result};
use crate::model::SyncItem;
use crate::path;

pub struct LocalFsAdapter {
    root: PathBuf,
    follow_symlinks: AtomicBool,
}

impl LocalFsAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), follow_symlinks: AtomicBool::new(false) }
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    async fn walk(&self, base: &Path, current: &Path, out: &mut Vec<SyncItem>) -> Result<()> {
        let mut entries = fs::read_dir(current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            let mut metadata = entry.metadata().await?;

            if metadata.file_type().is_symlink() {
                if !self.follow_symlinks.load(Ordering::Relaxed) {
                    continue;
                }
                // Re-stat through the symlink to describe what it points at.
                metadata = match fs::metadata(&entry_path).await {
                    Ok(m) => m,
                    Err(_) => continue, // dangling symlink: skip rather than error the whole walk
                };
            }

            let relative = path::normalize(
                &entry_path
                    .strip_prefix(base)
                    .map_err(|e| EngineError::InvalidPath(e.to_string()))?
                    .to_string_lossy(),
            )?;

            if metadata.is_dir() {
                out.push(SyncItem::directory(relative));
                Box::pin(self.walk(base, &entry_path, out)).await?;
            } else if metadata.is_file() {
                let modified = metadata
                    .modified()
                    .ok()
                    .map(DateTime::<Utc>::from);
                let mut item = SyncItem::file(relative, metadata.len());
                if let Some(when) = modified {
                    item = item.with_modified(when);
                }
                out.push(item);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for LocalFsAdapter {
    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_timestamps: true,
            supports_permissions: cfg!(unix),
            supports_etags: false,
            supports_symlinks: cfg!(unix),
            supports_atomic_rename: true,
        }
    }

    fn set_follow_symlinks(&self, enabled: bool) {
        self.follow_symlinks.store(enabled, Ordering::Relaxed);
    }

    async fn list(&self, prefix: &str) -> Result<Vec<SyncItem>> {
        let base = self.absolute(prefix);
        if !base.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        self.walk(&base, &base, &mut out).await?;
        Ok(out)
    }

    async fn stat(&self, path_str: &str) -> Result<Option<SyncItem>> {
        let full = self.absolute(path_str);
        match fs::metadata(&full).await {
            Ok(metadata) => {
                let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
                let item = if metadata.is_dir() {
                    SyncItem::directory(path_str.to_string())
                } else {
                    let mut item = SyncItem::file(path_str.to_string(), metadata.len());
                    if let Some(when) = modified {
                        item = item.with_modified(when);
                    }
                    item
                };
                Ok(Some(item))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path_str: &str) -> Result<BoxedReader> {
        let full = self.absolute(path_str);
        let file = fs::File::open(&full).await?;
        Ok(Box::new(file))
    }

    async fn write(&self, path_str: &str, mut content: BoxedReader, _size_hint: Option<u64>) -> Result<()> {
        let full = self.absolute(path_str);
        let parent = full
            .parent()
            .ok_or_else(|| EngineError::InvalidPath(path_str.to_string()))?;
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(".{}.syncmesh-tmp", uuid::Uuid::new_v4()));
        {
            let mut temp_file = fs::File::create(&temp_path).await?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let read = content.read(&mut buf).await?;
                if read == 0 {
                    break;
                }
                temp_file.write_all(&buf[..read]).await?;
            }
            temp_file.flush().await?;
            temp_file.sync_all().await?;
        }

        if let Err(e) = fs::rename(&temp_path, &full).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, path_str: &str) -> Result<()> {
        let full = self.absolute(path_str);
        match fs::metadata(&full).await {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir(&full).await.map_err(Into::into),
            Ok(_) => fs::remove_file(&full).await.map_err(Into::into),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_directory(&self, path_str: &str) -> Result<()> {
        fs::create_dir_all(self.absolute(path_str)).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let to_full = self.absolute(to);
        if let Some(parent) = to_full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(self.absolute(from), &to_full).await?;
        Ok(())
    }

    async fn hash(&self, path_str: &str) -> Result<String> {
        let full = self.absolute(path_str);
        let mut file = fs::File::open(&full).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    async fn test_connection(&self) -> Result<()> {
        if !self.root.exists() {
            return Err(EngineError::NotFound(format!(
                "local root does not exist: {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn set_modified(&self, path_str: &str, when: DateTime<Utc>) -> Result<()> {
        let full = self.absolute(path_str);
        let system_time: std::time::SystemTime = when.into();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::options().write(true).open(&full)?;
            file.set_modified(system_time)
        })
        .await
        .map_err(|e| EngineError::Adapter(e.to_string()))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_then_read_round_trips_content() {
        let dir = tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path());
        let data = b"hello sync".to_vec();
        adapter
            .write("a/b.txt", Box::new(std::io::Cursor::new(data.clone())), Some(data.len() as u64))
            .await
            .unwrap();

        let mut reader = adapter.read("a/b.txt").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn write_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path());
        adapter
            .write("f.txt", Box::new(std::io::Cursor::new(b"x".to_vec())), None)
            .await
            .unwrap();

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(e) = entries.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["f.txt".to_string()]);
    }

    #[tokio::test]
    async fn stat_missing_path_returns_none() {
        let dir = tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path());
        assert!(adapter.stat("missing.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_recurses_into_subdirectories() {
        let dir = tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path());
        adapter.create_directory("sub").await.unwrap();
        adapter
            .write("sub/file.txt", Box::new(std::io::Cursor::new(b"y".to_vec())), None)
            .await
            .unwrap();

        let items = adapter.list("").await.unwrap();
        let paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"sub"));
        assert!(paths.contains(&"sub/file.txt"));
    }

    #[tokio::test]
    async fn set_modified_updates_mtime() {
        let dir = tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path());
        adapter
            .write("f.txt", Box::new(std::io::Cursor::new(b"x".to_vec())), None)
            .await
            .unwrap();

        let target = Utc::now() - chrono::Duration::days(2);
        adapter.set_modified("f.txt", target).await.unwrap();

        let stat = adapter.stat("f.txt").await.unwrap().unwrap();
        let observed = stat.last_modified.unwrap();
        assert!((observed - target).num_seconds().abs() <= 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn list_skips_symlinks_unless_follow_is_enabled() {
        let dir = tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path());
        adapter
            .write("real.txt", Box::new(std::io::Cursor::new(b"z".to_vec())), None)
            .await
            .unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt")).unwrap();

        let items = adapter.list("").await.unwrap();
        let paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
        assert!(!paths.contains(&"link.txt"));

        adapter.set_follow_symlinks(true);
        let items = adapter.list("").await.unwrap();
        let paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"link.txt"));
    }
}
