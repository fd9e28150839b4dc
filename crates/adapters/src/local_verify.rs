// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local-filesystem [`VerifyThenDeleteTarget`] (§4.2): walks the source
//! tree, confirms every file has a matching counterpart under the
//! destination, and removes the verified source files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bku_core::VerificationMode;
use sha2::{Digest, Sha256};

use crate::deletion::VerifyThenDeleteTarget;

pub struct LocalFsVerifyTarget {
    source: PathBuf,
    dest: PathBuf,
    use_checksum: bool,
}

impl LocalFsVerifyTarget {
    pub fn new(source: PathBuf, dest: PathBuf, verification_mode: VerificationMode) -> Self {
        Self { source, dest, use_checksum: verification_mode != VerificationMode::Fast }
    }
}

async fn collect_relative_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.metadata().await?.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                files.push(rel.to_path_buf());
            }
        }
    }
    Ok(files)
}

async fn sha256_of(path: &Path) -> std::io::Result<[u8; 32]> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hasher.finalize().into())
}

#[async_trait]
impl VerifyThenDeleteTarget for LocalFsVerifyTarget {
    async fn verify(&self) -> std::io::Result<bool> {
        let files = collect_relative_files(&self.source).await?;
        for rel in &files {
            let src_path = self.source.join(rel);
            let dst_path = self.dest.join(rel);

            let src_meta = match tokio::fs::metadata(&src_path).await {
                Ok(meta) => meta,
                Err(_) => return Ok(false),
            };
            let dst_meta = match tokio::fs::metadata(&dst_path).await {
                Ok(meta) => meta,
                Err(_) => return Ok(false),
            };
            if src_meta.len() != dst_meta.len() {
                return Ok(false);
            }

            if self.use_checksum {
                let src_sum = sha256_of(&src_path).await?;
                let dst_sum = sha256_of(&dst_path).await?;
                if src_sum != dst_sum {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn delete_all(&self, on_delete: &mut dyn FnMut(&Path, u64)) -> (u64, u64, u64) {
        let files = match collect_relative_files(&self.source).await {
            Ok(files) => files,
            Err(_) => return (0, 0, 1),
        };

        let mut files_deleted = 0u64;
        let mut bytes_deleted = 0u64;
        let mut errors = 0u64;

        for rel in files {
            let path = self.source.join(&rel);
            let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    files_deleted += 1;
                    bytes_deleted += size;
                    on_delete(&path, size);
                }
                Err(_) => errors += 1,
            }
        }

        (files_deleted, bytes_deleted, errors)
    }
}
