use crate::config::types::{Ecosystem, InstalledPackage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Environment produced by provisioning, threaded explicitly through the
/// remaining build steps instead of living as ambient filesystem state.
///
/// Only a fully successful provisioning run produces one of these; a failed
/// batch yields an error and no environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedEnvironment {
    image_root: PathBuf,
    packages: BTreeSet<InstalledPackage>,
}

impl ProvisionedEnvironment {
    pub(crate) fn new(image_root: PathBuf) -> Self {
        Self {
            image_root,
            packages: BTreeSet::new(),
        }
    }

    pub(crate) fn record<I>(&mut self, installed: I)
    where
        I: IntoIterator<Item = InstalledPackage>,
    {
        self.packages.extend(installed);
    }

    pub fn image_root(&self) -> &Path {
        &self.image_root
    }

    /// Installed packages, sorted by ecosystem then name
    pub fn packages(&self) -> impl Iterator<Item = &InstalledPackage> {
        self.packages.iter()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn contains(&self, ecosystem: Ecosystem, name: &str) -> bool {
        self.packages
            .iter()
            .any(|p| p.ecosystem == ecosystem && p.name == name)
    }
}
