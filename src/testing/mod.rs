//! Testing infrastructure
//!
//! In-memory installer and image fixtures for exercising the build pipeline
//! without touching the host package manager.

pub mod fixtures;

pub use fixtures::{ImageFixture, FIXTURE_ENTRYPOINT, FIXTURE_TEMPLATE};

use crate::config::types::{BootError, Channel, Ecosystem, InstalledPackage, Result};
use crate::provision::{InstallBatch, PackageInstaller};
use std::collections::BTreeSet;

/// Installer backed by a fixed package index.
///
/// A batch installs only if every package is in the index for the batch's
/// ecosystem and channel.
#[derive(Debug, Default)]
pub struct IndexInstaller {
    index: BTreeSet<(Ecosystem, Channel, String)>,
    installed: Vec<InstalledPackage>,
    invocations: usize,
}

impl IndexInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_packages(Ecosystem::System, Channel::Stable, names)
    }

    pub fn with_python<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_packages(Ecosystem::Python, Channel::Stable, names)
    }

    pub fn with_packages<I, S>(mut self, ecosystem: Ecosystem, channel: Channel, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.index.insert((ecosystem, channel.clone(), name.into()));
        }
        self
    }

    pub fn installed(&self) -> &[InstalledPackage] {
        &self.installed
    }

    /// Number of batches the installer was asked to install
    pub fn invocations(&self) -> usize {
        self.invocations
    }
}

impl PackageInstaller for IndexInstaller {
    fn install(&mut self, batch: &InstallBatch) -> Result<Vec<InstalledPackage>> {
        self.invocations += 1;

        for spec in &batch.packages {
            let key = (batch.ecosystem, batch.channel.clone(), spec.name.clone());
            if !self.index.contains(&key) {
                return Err(BootError::install(
                    spec.to_string(),
                    format!("no such package in {} channel {}", batch.ecosystem, batch.channel),
                ));
            }
        }

        let installed: Vec<InstalledPackage> = batch
            .packages
            .iter()
            .map(|spec| InstalledPackage::from_spec(batch.ecosystem, spec))
            .collect();
        self.installed.extend(installed.iter().cloned());
        Ok(installed)
    }
}
