//! Extension packages — zip validation and extraction.
//!
//! Constraints: a single top-level directory, ≤50 MiB total uncompressed,
//! no path-traversal entries, no symlinks. `manifest.json` must exist at
//! the package root. Validation happens before anything touches disk.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

/// Total uncompressed size cap.
pub const MAX_PACKAGE_BYTES: u64 = 50 * 1024 * 1024;

/// Unix mode bits marking a symlink entry.
const S_IFLNK: u32 = 0o120000;
const S_IFMT: u32 = 0o170000;

/// Summary of a validated package.
#[derive(Clone, Debug)]
pub struct PackageInfo {
    /// The single top-level directory name.
    pub root_dir: String,
    pub total_uncompressed: u64,
    pub entry_count: usize,
}

/// Validate a package zip without extracting it.
pub fn validate_package(path: &Path) -> KernelResult<PackageInfo> {
    let file = File::open(path)
        .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, format!("open package: {e}")))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, format!("bad zip: {e}")))?;

    let mut root: Option<String> = None;
    let mut total: u64 = 0;
    let mut has_manifest = false;

    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
        let raw_name = entry.name().to_string();

        if raw_name.contains("..") || raw_name.starts_with('/') || entry.enclosed_name().is_none() {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                format!("package entry {raw_name:?} escapes the package root"),
            ));
        }
        if let Some(mode) = entry.unix_mode() {
            if mode & S_IFMT == S_IFLNK {
                return Err(KernelError::new(
                    ErrorCode::ManifestInvalid,
                    format!("package entry {raw_name:?} is a symlink"),
                ));
            }
        }

        let top = raw_name.split('/').next().unwrap_or_default().to_string();
        if top.is_empty() {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                format!("package entry {raw_name:?} has no top-level directory"),
            ));
        }
        match &root {
            None => root = Some(top),
            Some(existing) if existing != &top => {
                return Err(KernelError::new(
                    ErrorCode::ManifestInvalid,
                    "package must have a single top-level directory",
                ));
            }
            _ => {}
        }

        total = total.saturating_add(entry.size());
        if total > MAX_PACKAGE_BYTES {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                format!("package exceeds {} MiB uncompressed", MAX_PACKAGE_BYTES / (1024 * 1024)),
            ));
        }

        if raw_name.ends_with("/manifest.json") && raw_name.matches('/').count() == 1 {
            has_manifest = true;
        }
    }

    let root = root.ok_or_else(|| {
        KernelError::new(ErrorCode::ManifestInvalid, "package is empty")
    })?;
    if !has_manifest {
        return Err(KernelError::new(
            ErrorCode::ManifestInvalid,
            "package is missing manifest.json at its root",
        ));
    }

    Ok(PackageInfo {
        root_dir: root,
        total_uncompressed: total,
        entry_count: archive.len(),
    })
}

/// Validate and extract a package into `dest`. Returns the extracted
/// root directory.
pub fn extract_package(path: &Path, dest: &Path) -> KernelResult<PathBuf> {
    let info = validate_package(path)?;

    let file = File::open(path)
        .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;

    std::fs::create_dir_all(dest)
        .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, e.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
        // Re-checked here even though validate passed: extraction must be
        // safe on its own.
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, e.to_string()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, e.to_string()))?;
        }
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
        std::fs::write(&out_path, content)
            .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, e.to_string()))?;
    }

    Ok(dest.join(info.root_dir))
}
