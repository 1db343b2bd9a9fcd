use crate::config::types::{BootError, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Mode applied to the runtime configuration once it is in place
pub const CONFIG_FILE_MODE: u32 = 0o444;

/// Copy `template_path` to `target_path` byte-for-byte.
///
/// The content is written to a temporary sibling, synced and renamed over the
/// target, so the target either holds the complete template or is untouched.
/// A missing template fails with `MissingTemplate` before anything is written.
/// Returns the SHA-256 of the materialized content.
pub fn materialize_config(template_path: &Path, target_path: &Path) -> Result<String> {
    if template_path.is_dir() {
        return Err(BootError::MissingTemplate {
            path: template_path.to_path_buf(),
        });
    }

    let content = match fs::read(template_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BootError::MissingTemplate {
                path: template_path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(BootError::Layout(format!(
                "Failed to read template {}: {}",
                template_path.display(),
                e
            )));
        }
    };

    let parent = target_path.parent().ok_or_else(|| {
        BootError::Layout(format!(
            "Config target has no parent directory: {}",
            target_path.display()
        ))
    })?;
    fs::create_dir_all(parent)?;

    let file_name = target_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(
        ".{}.{}.tmp",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));

    if let Err(e) = write_staged(&staging, target_path, &content) {
        if let Err(cleanup) = fs::remove_file(&staging) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "Failed to remove staging file {}: {}",
                    staging.display(),
                    cleanup
                );
            }
        }
        return Err(e);
    }

    log::info!(
        "Materialized {} -> {} ({} bytes)",
        template_path.display(),
        target_path.display(),
        content.len()
    );
    Ok(digest_bytes(&content))
}

fn write_staged(staging: &Path, target: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(staging)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::set_permissions(staging, fs::Permissions::from_mode(CONFIG_FILE_MODE))?;
    fs::rename(staging, target)?;
    Ok(())
}

/// Hex SHA-256 of a byte slice
pub fn digest_bytes(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Hex SHA-256 of a file's content
pub fn digest_file(path: &Path) -> Result<String> {
    Ok(digest_bytes(&fs::read(path)?))
}
