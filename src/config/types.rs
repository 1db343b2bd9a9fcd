/// Core types and structures for the bootbox system
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Package ecosystem a [`PackageSpec`] is installed through
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    /// Operating-system packages (apk)
    System,
    /// Language-runtime packages (pip)
    Python,
}

impl Ecosystem {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Python => "python",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository channel a package is resolved from
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Channel {
    /// The distribution's default stable repositories
    #[default]
    Stable,
    /// A named alternate repository declared in the manifest (e.g. `edge`)
    Pinned(String),
}

impl Channel {
    pub fn pinned(tag: impl Into<String>) -> Self {
        Self::Pinned(tag.into())
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Stable => None,
            Self::Pinned(tag) => Some(tag.as_str()),
        }
    }
}

impl From<Option<String>> for Channel {
    fn from(tag: Option<String>) -> Self {
        match tag {
            None => Self::Stable,
            Some(tag) if tag.is_empty() || tag == "stable" => Self::Stable,
            Some(tag) => Self::Pinned(tag),
        }
    }
}

impl From<Channel> for Option<String> {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Stable => None,
            Channel::Pinned(tag) => Some(tag),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => f.write_str("stable"),
            Self::Pinned(tag) => write!(f, "@{}", tag),
        }
    }
}

/// A package requested by the build manifest, tagged with its source channel
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    /// Exact version pin; `None` installs whatever the channel currently serves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub channel: Channel,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            channel: Channel::Stable,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Channel::Pinned(tag) = &self.channel {
            write!(f, "@{}", tag)?;
        }
        if let Some(version) = &self.version {
            write!(f, "={}", version)?;
        }
        Ok(())
    }
}

/// A package that an installer reported as present after provisioning
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub version: Option<String>,
    pub channel: Channel,
}

impl InstalledPackage {
    pub fn from_spec(ecosystem: Ecosystem, spec: &PackageSpec) -> Self {
        Self {
            ecosystem,
            name: spec.name.clone(),
            version: spec.version.clone(),
            channel: spec.channel.clone(),
        }
    }
}

/// Result type for bootbox operations
pub type Result<T> = std::result::Result<T, BootError>;

/// Errors raised while building or starting an image
#[derive(Error, Debug)]
pub enum BootError {
    #[error("dependency install failed for '{package}': {reason}")]
    DependencyInstallFailure { package: String, reason: String },

    #[error("configuration template not found: {}", path.display())]
    MissingTemplate { path: PathBuf },

    #[error("worker start failed: {0}")]
    WorkerStartFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Layout error: {0}")]
    Layout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BootError {
    pub fn install(package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyInstallFailure {
            package: package.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable name used in audit events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DependencyInstallFailure { .. } => "dependency_install_failure",
            Self::MissingTemplate { .. } => "missing_template",
            Self::WorkerStartFailure(_) => "worker_start_failure",
            Self::Config(_) => "config",
            Self::Layout(_) => "layout",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for BootError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convert boot errors to process exit codes
impl From<&BootError> for i32 {
    fn from(err: &BootError) -> i32 {
        match err {
            BootError::DependencyInstallFailure { .. } => 10,
            BootError::MissingTemplate { .. } => 11,
            BootError::WorkerStartFailure(_) => 12,
            BootError::Config(_) => 2,
            BootError::Layout(_) | BootError::Serialization(_) | BootError::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_display_includes_version_and_channel() {
        let spec = PackageSpec::new("postgresql-dev")
            .with_version("9.5.4-r0")
            .with_channel(Channel::pinned("edge"));
        assert_eq!(spec.to_string(), "postgresql-dev@edge=9.5.4-r0");
        assert_eq!(PackageSpec::new("bash").to_string(), "bash");
    }

    #[test]
    fn channel_deserializes_from_tag_name() {
        let spec: PackageSpec =
            serde_json::from_str(r#"{"name":"postgresql-dev","channel":"edge"}"#).unwrap();
        assert_eq!(spec.channel, Channel::pinned("edge"));

        let spec: PackageSpec = serde_json::from_str(r#"{"name":"bash"}"#).unwrap();
        assert_eq!(spec.channel, Channel::Stable);

        let spec: PackageSpec =
            serde_json::from_str(r#"{"name":"bash","channel":"stable"}"#).unwrap();
        assert_eq!(spec.channel, Channel::Stable);
    }

    #[test]
    fn exit_codes_distinguish_fatal_phases() {
        assert_eq!(i32::from(&BootError::install("x", "y")), 10);
        assert_eq!(
            i32::from(&BootError::MissingTemplate {
                path: PathBuf::from("Docker/invoke.yml")
            }),
            11
        );
        assert_eq!(i32::from(&BootError::WorkerStartFailure("gone".into())), 12);
        assert_eq!(i32::from(&BootError::Config("bad".into())), 2);
    }
}
