use crate::config::types::{BootError, InstalledPackage, Result};
use crate::layout::materialize::digest_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Schema version written into every build record
pub const BUILD_RECORD_VERSION: u32 = 1;

/// Marks an image root as completely built.
///
/// Written last by a successful build and removed first by a new one, so its
/// presence means provisioning, the source copy and config materialization all
/// completed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub version: u32,
    pub build_id: String,
    pub built_at: DateTime<Utc>,
    pub packages: Vec<InstalledPackage>,
    pub config_target: String,
    pub config_sha256: String,
}

impl BuildRecord {
    pub fn new(
        build_id: String,
        packages: Vec<InstalledPackage>,
        config_target: String,
        config_sha256: String,
    ) -> Self {
        Self {
            version: BUILD_RECORD_VERSION,
            build_id,
            built_at: Utc::now(),
            packages,
            config_target,
            config_sha256,
        }
    }

    /// Write the record atomically (staging file + rename)
    pub fn write(&self, path: &Path) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            BootError::Layout(format!("Build record has no parent: {}", path.display()))
        })?;
        fs::create_dir_all(parent)?;

        let json = serde_json::to_vec_pretty(self)?;
        let staging = parent.join(format!(".build.{}.tmp", self.build_id));
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&staging, path)?;
        log::debug!("Wrote build record {}", path.display());
        Ok(())
    }

    /// Load a build record; a missing record means the image is not usable
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BootError::WorkerStartFailure(format!(
                    "no completed build at {} (build record missing)",
                    path.parent()
                        .and_then(Path::parent)
                        .unwrap_or(path)
                        .display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let record: BuildRecord = serde_json::from_str(&content).map_err(|e| {
            BootError::WorkerStartFailure(format!(
                "build record {} is damaged: {}",
                path.display(),
                e
            ))
        })?;
        if record.version != BUILD_RECORD_VERSION {
            return Err(BootError::WorkerStartFailure(format!(
                "unsupported build record version {} (expected {})",
                record.version, BUILD_RECORD_VERSION
            )));
        }
        Ok(record)
    }

    /// Remove a stale record; absent is fine
    pub fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                log::debug!("Removed stale build record {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Check that the runtime config on disk still matches this build
    pub fn verify_config(&self, config_path: &Path) -> Result<()> {
        let actual = match digest_file(config_path) {
            Ok(digest) => digest,
            Err(BootError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BootError::WorkerStartFailure(format!(
                    "runtime config {} is missing",
                    config_path.display()
                )));
            }
            Err(e) => return Err(e),
        };

        if actual != self.config_sha256 {
            return Err(BootError::WorkerStartFailure(format!(
                "runtime config {} changed after build {} (sha256 {} != {})",
                config_path.display(),
                self.build_id,
                actual,
                self.config_sha256
            )));
        }
        Ok(())
    }
}
