use std::path::{Path, PathBuf};

use crate::error::{Result, ShareError};
use crate::transfer::constants::{BUFFER_SIZE, FALLBACK_FILE_NAME, MAX_FILENAME_LENGTH};

/// Reduce a peer-supplied name to a safe base name inside the download root
pub fn sanitize_file_name(file_name: &str) -> String {
    // Split by both / and \ so Windows-style paths from any sender are handled
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();

    let mut clean_name: String = base.chars().filter(|c| !c.is_control()).collect();

    if clean_name.trim().is_empty() || clean_name == "." || clean_name == ".." {
        return FALLBACK_FILE_NAME.to_string();
    }

    if clean_name.len() > MAX_FILENAME_LENGTH {
        // Keep a short extension when there is one
        let ext = clean_name
            .rfind('.')
            .map(|idx| clean_name[idx..].to_string())
            .filter(|ext| ext.len() < 20);
        let keep = MAX_FILENAME_LENGTH - ext.as_ref().map_or(0, |e| e.len());

        let mut cutoff = keep;
        while !clean_name.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        clean_name.truncate(cutoff);
        if let Some(ext) = ext {
            clean_name.push_str(&ext);
        }
    }

    clean_name
}

/// Locate an item directly inside the shared directory.
///
/// Names that would escape the shared root are treated as missing.
pub async fn resolve_item(shared_dir: &Path, item_name: &str) -> Result<(PathBuf, bool)> {
    let escapes = item_name.is_empty()
        || item_name == "."
        || item_name == ".."
        || item_name.contains(['/', '\\']);
    if escapes {
        return Err(ShareError::ItemNotFound(item_name.to_string()));
    }

    let path = shared_dir.join(item_name);
    match tokio::fs::metadata(&path).await {
        Ok(meta) => Ok((path, meta.is_dir())),
        Err(_) => Err(ShareError::ItemNotFound(item_name.to_string())),
    }
}

/// Buffer for copying `total` bytes, never larger than [`BUFFER_SIZE`]
pub fn copy_buffer(total: u64) -> Vec<u8> {
    let len = total.clamp(1, BUFFER_SIZE as u64) as usize;
    vec![0u8; len]
}

/// Deletes a destination file on drop unless [`keep`](PartialFile::keep) is called.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.keep && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name_basic() {
        assert_eq!(sanitize_file_name("normal_file.txt"), "normal_file.txt");
        assert_eq!(sanitize_file_name("path/to/file.txt"), "file.txt");
        assert_eq!(sanitize_file_name("/absolute/path/to/file.txt"), "file.txt");
    }

    #[test]
    fn test_sanitize_file_name_traversal() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("..\\..\\Windows\\System32\\cmd.exe"), "cmd.exe");
        assert_eq!(sanitize_file_name("folder\\../file.txt"), "file.txt");
    }

    #[test]
    fn test_sanitize_file_name_dangerous() {
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name(""), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("dir/"), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("a\u{0}b.txt"), "ab.txt");
    }

    #[test]
    fn test_sanitize_file_name_unicode_truncate() {
        let mut long_unicode = "🦀".repeat(100);
        long_unicode.push_str(".txt");

        let sanitized = sanitize_file_name(&long_unicode);
        assert!(sanitized.len() <= MAX_FILENAME_LENGTH);
        assert!(sanitized.ends_with(".txt"));
        assert_eq!(sanitized.trim_end_matches(".txt").chars().last(), Some('🦀'));
    }

    #[test]
    fn test_partial_file_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("dropped.bin");
        let kept = dir.path().join("kept.bin");
        std::fs::write(&dropped, b"xx").unwrap();
        std::fs::write(&kept, b"yy").unwrap();

        drop(PartialFile::new(dropped.clone()));
        let kept_path = PartialFile::new(kept.clone()).keep();

        assert!(!dropped.exists());
        assert!(kept.exists());
        assert_eq!(kept_path, kept);
    }

    #[tokio::test]
    async fn test_resolve_item_refuses_escape() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        assert!(resolve_item(dir.path(), "a.txt").await.is_ok());
        for name in ["../a.txt", "..", "", "sub/a.txt", "missing.txt"] {
            assert!(matches!(
                resolve_item(dir.path(), name).await,
                Err(ShareError::ItemNotFound(_))
            ));
        }
    }
}
