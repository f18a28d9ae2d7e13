//! Directory packing for folder transfers.
//!
//! A folder travels as a tar archive whose entries are rooted at the folder's
//! own name, so unpacking into the download directory recreates
//! `<downloads>/<folder>/...`. These functions block; async callers run them
//! through [`tokio::task::spawn_blocking`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Result, ShareError};

/// File extension of packed folders
pub const ARCHIVE_EXTENSION: &str = "tar";

/// Pack `src_dir` into the archive file at `archive_path`.
pub fn pack_directory(src_dir: &Path, archive_path: &Path) -> Result<()> {
    let root_name = src_dir
        .file_name()
        .ok_or_else(|| ShareError::Archive(format!("{:?} has no folder name", src_dir)))?;

    let file = File::create(archive_path)
        .map_err(|e| ShareError::Archive(format!("create {:?}: {}", archive_path, e)))?;
    let mut builder = tar::Builder::new(BufWriter::new(file));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(root_name, src_dir)
        .map_err(|e| ShareError::Archive(format!("pack {:?}: {}", src_dir, e)))?;

    let mut writer = builder
        .into_inner()
        .map_err(|e| ShareError::Archive(format!("finish {:?}: {}", archive_path, e)))?;
    writer
        .flush()
        .map_err(|e| ShareError::Archive(format!("flush {:?}: {}", archive_path, e)))?;
    Ok(())
}

/// Unpack `archive_path` into `dest_dir`.
///
/// Entries that would land outside `dest_dir` are refused by the tar crate.
pub fn unpack_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .map_err(|e| ShareError::Archive(format!("open {:?}: {}", archive_path, e)))?;
    let mut archive = tar::Archive::new(file);
    archive.set_overwrite(true);
    archive
        .unpack(dest_dir)
        .map_err(|e| ShareError::Archive(format!("unpack {:?}: {}", archive_path, e)))
}
