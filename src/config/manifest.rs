use crate::config::types::{BootError, PackageSpec, Result};
/// Build manifest loading from bootbox.json
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name looked up in the current directory when no manifest is given
pub const DEFAULT_MANIFEST_NAME: &str = "bootbox.json";

/// Environment variable naming a manifest path
pub const MANIFEST_ENV_VAR: &str = "BOOTBOX_MANIFEST";

fn default_image_root() -> PathBuf {
    PathBuf::from("/app")
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_template() -> PathBuf {
    PathBuf::from("Docker/invoke.yml")
}

fn default_config_target() -> String {
    "qabel.yaml".to_string()
}

fn default_entrypoint() -> Vec<String> {
    vec!["Docker/entrypoint.sh".to_string()]
}

fn default_port() -> u16 {
    8881
}

fn default_system_tool() -> Vec<String> {
    vec!["apk".to_string(), "add".to_string(), "--no-cache".to_string()]
}

fn default_python_tool() -> Vec<String> {
    vec![
        "pip3".to_string(),
        "install".to_string(),
        "--no-cache-dir".to_string(),
    ]
}

fn default_repositories_file() -> PathBuf {
    PathBuf::from("/etc/apk/repositories")
}

/// Installer commands used during provisioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Command prefix for system packages; package arguments are appended
    #[serde(default = "default_system_tool")]
    pub system: Vec<String>,
    /// Command prefix for language packages; package arguments are appended
    #[serde(default = "default_python_tool")]
    pub python: Vec<String>,
    /// apk repositories file that pinned channel tags are registered in
    #[serde(default = "default_repositories_file")]
    pub repositories_file: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            system: default_system_tool(),
            python: default_python_tool(),
            repositories_file: default_repositories_file(),
        }
    }
}

/// Full bootbox.json structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootManifest {
    /// Directory the source tree is copied into and the worker runs from
    #[serde(default = "default_image_root")]
    pub image_root: PathBuf,
    /// Build context copied into the image root
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Configuration template, relative to the source directory
    #[serde(default = "default_template")]
    pub template: PathBuf,
    /// Bare file name the worker reads its configuration from
    #[serde(default = "default_config_target")]
    pub config_target: String,
    /// Worker command line; `{port}` and `{config}` are substituted at start
    #[serde(default = "default_entrypoint")]
    pub entrypoint: Vec<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pinned channel tags mapped to repository URLs
    #[serde(default)]
    pub channels: BTreeMap<String, String>,
    #[serde(default)]
    pub system_packages: Vec<PackageSpec>,
    #[serde(default)]
    pub python_packages: Vec<PackageSpec>,
    #[serde(default)]
    pub tools: ToolConfig,
    /// Extra environment exported to the worker
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Directory relative paths are resolved against (the manifest's own directory)
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for BootManifest {
    fn default() -> Self {
        Self {
            image_root: default_image_root(),
            source_dir: default_source_dir(),
            template: default_template(),
            config_target: default_config_target(),
            entrypoint: default_entrypoint(),
            port: default_port(),
            channels: BTreeMap::new(),
            system_packages: Vec::new(),
            python_packages: Vec::new(),
            tools: ToolConfig::default(),
            environment: BTreeMap::new(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl BootManifest {
    /// Load manifest from a JSON file; relative paths resolve against its directory
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BootError::Config(format!(
                "Failed to read manifest {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut manifest: BootManifest = serde_json::from_str(&content).map_err(|e| {
            BootError::Config(format!(
                "Failed to parse manifest JSON {}: {}",
                path.display(),
                e
            ))
        })?;

        manifest.base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        log::debug!(
            "Loaded manifest {} ({} system, {} python packages)",
            path.display(),
            manifest.system_packages.len(),
            manifest.python_packages.len()
        );
        Ok(manifest)
    }

    /// Load manifest from `$BOOTBOX_MANIFEST` or ./bootbox.json
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var(MANIFEST_ENV_VAR) {
            return Self::load_from_file(path);
        }

        let manifest_path = std::env::current_dir()
            .map_err(|e| BootError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_MANIFEST_NAME);

        if !manifest_path.exists() {
            return Err(BootError::Config(format!(
                "{} not found in current directory",
                DEFAULT_MANIFEST_NAME
            )));
        }

        Self::load_from_file(manifest_path)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Build context directory on the build host
    pub fn source_root(&self) -> PathBuf {
        self.resolve(&self.source_dir)
    }

    /// Image root directory
    pub fn image_root(&self) -> PathBuf {
        self.resolve(&self.image_root)
    }

    /// Template location inside the build context
    pub fn template_path(&self) -> PathBuf {
        self.source_root().join(&self.template)
    }

    /// Fixed runtime configuration path inside the image root
    pub fn config_path(&self) -> PathBuf {
        self.image_root().join(&self.config_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Channel;

    #[test]
    fn empty_manifest_uses_image_defaults() {
        let manifest: BootManifest = serde_json::from_str("{}").unwrap();
        assert_eq!(manifest.image_root, PathBuf::from("/app"));
        assert_eq!(manifest.template, PathBuf::from("Docker/invoke.yml"));
        assert_eq!(manifest.config_target, "qabel.yaml");
        assert_eq!(manifest.port, 8881);
        assert_eq!(manifest.tools.system[0], "apk");
        assert!(manifest.system_packages.is_empty());
    }

    #[test]
    fn load_resolves_relative_paths_against_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("bootbox.json");
        std::fs::write(
            &manifest_path,
            r#"{
                "image_root": "image",
                "source_dir": "context",
                "channels": {"edge": "http://dl-cdn.alpinelinux.org/alpine/edge/main"},
                "system_packages": [{"name": "bash"}, {"name": "postgresql-dev", "channel": "edge"}]
            }"#,
        )
        .unwrap();

        let manifest = BootManifest::load_from_file(&manifest_path).unwrap();
        assert_eq!(manifest.image_root(), dir.path().join("image"));
        assert_eq!(
            manifest.template_path(),
            dir.path().join("context").join("Docker/invoke.yml")
        );
        assert_eq!(manifest.config_path(), dir.path().join("image").join("qabel.yaml"));
        assert_eq!(manifest.system_packages[1].channel, Channel::pinned("edge"));
    }

    #[test]
    fn malformed_manifest_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("bootbox.json");
        std::fs::write(&manifest_path, "{ not json").unwrap();

        let err = BootManifest::load_from_file(&manifest_path).unwrap_err();
        assert!(matches!(err, BootError::Config(_)));
    }
}
