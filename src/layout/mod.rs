//! Image filesystem layout
//!
//! - [`tree`]: source tree copy into the image root
//! - [`materialize`]: template to runtime config, atomically
//! - [`record`]: build record marking an image root usable

pub mod materialize;
pub mod record;
pub mod tree;

pub use materialize::materialize_config;
pub use record::BuildRecord;
pub use tree::{copy_tree, CopyStats};

use crate::config::manifest::BootManifest;
use std::path::{Path, PathBuf};

/// Directory inside the image root holding bootbox state
pub const STATE_DIR_NAME: &str = ".bootbox";

/// Build record file name inside the state directory
pub const BUILD_RECORD_NAME: &str = "build.json";

/// Files placed into the runtime filesystem at build time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    root: PathBuf,
    config_target: String,
    entrypoint: Vec<String>,
}

impl ImageLayout {
    pub fn new(root: PathBuf, config_target: String, entrypoint: Vec<String>) -> Self {
        Self {
            root,
            config_target,
            entrypoint,
        }
    }

    pub fn from_manifest(manifest: &BootManifest) -> Self {
        Self::new(
            manifest.image_root(),
            manifest.config_target.clone(),
            manifest.entrypoint.clone(),
        )
    }

    /// Image root; also the worker's working directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_target(&self) -> &str {
        &self.config_target
    }

    /// Fixed path the worker reads its configuration from
    pub fn config_path(&self) -> PathBuf {
        self.root.join(&self.config_target)
    }

    pub fn entrypoint(&self) -> &[String] {
        &self.entrypoint
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR_NAME)
    }

    pub fn record_path(&self) -> PathBuf {
        self.state_dir().join(BUILD_RECORD_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_hang_off_the_image_root() {
        let layout = ImageLayout::from_manifest(&BootManifest::default());
        assert_eq!(layout.root(), Path::new("/app"));
        assert_eq!(layout.config_path(), PathBuf::from("/app/qabel.yaml"));
        assert_eq!(layout.record_path(), PathBuf::from("/app/.bootbox/build.json"));
        assert_eq!(layout.entrypoint(), &["Docker/entrypoint.sh".to_string()]);
    }
}
