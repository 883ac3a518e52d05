use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// A durably stored attachment.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Path relative to the storage root, as recorded in the database.
    pub relative_path: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Hex SHA-256 digest of the content.
    pub sha256: String,
    pub size_bytes: u64,
}

/// Attachment storage rooted at a single directory. Files are laid out as
/// `<root>/<ticket-number>/<digest-prefix>_<filename>` so the same content
/// for the same ticket always lands on the same path. Files are never
/// overwritten; a path that already exists is reused as-is.
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes attachment content under the ticket's directory. The digest
    /// is computed before any filesystem work so the caller can record it
    /// in the same transaction as the write.
    pub fn store(
        &self,
        ticket_number: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<StoredFile, StorageError> {
        let sha256 = hex::encode(Sha256::digest(content));

        let dir_path = self.root.join(ticket_number);
        ensure_directory(&dir_path)?;

        let full_filename = format!("{}_{}", &sha256[..16], truncate_filename(filename, 160));
        let path = dir_path.join(&full_filename);
        let relative_path = format!("{}/{}", ticket_number, full_filename);

        // Atomic create; an existing file has the same digest and is reused
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(content).map_err(|e| StorageError::WriteFile {
                    path: path.clone(),
                    source: e,
                })?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!("Attachment already stored at {}, reusing", path.display());
            }
            Err(e) => {
                return Err(StorageError::WriteFile { path, source: e });
            }
        }

        Ok(StoredFile {
            relative_path,
            path,
            sha256,
            size_bytes: content.len() as u64,
        })
    }

    /// Removes a ticket's attachment directory. Missing directories are
    /// fine; retention cleanup runs against tickets that may never have
    /// had attachments.
    pub fn remove_ticket_dir(&self, ticket_number: &str) -> Result<(), StorageError> {
        let dir_path = self.root.join(ticket_number);
        match std::fs::remove_dir_all(&dir_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::RemoveFile {
                path: dir_path,
                source: e,
            }),
        }
    }
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Shortens a filename to at most `max` bytes, keeping the extension.
fn truncate_filename(filename: &str, max: usize) -> String {
    if filename.len() <= max {
        return filename.to_string();
    }

    let (base, ext) = if let Some(dot_pos) = filename.rfind('.') {
        (&filename[..dot_pos], &filename[dot_pos..])
    } else {
        (filename, "")
    };

    let keep = max.saturating_sub(ext.len()).max(1);
    let base: String = base.chars().take(keep).collect();
    format!("{}{}", base, ext)
}
