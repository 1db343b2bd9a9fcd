//! Package provisioning
//!
//! Resolves the manifest's packages to their channels, then runs one installer
//! invocation per batch. The first failing batch aborts provisioning; no
//! environment value is produced for a partial install.

pub mod channel;
pub mod environment;
pub mod installer;

pub use channel::{resolve_plan, InstallBatch, InstallPlan};
pub use environment::ProvisionedEnvironment;
pub use installer::{CommandInstaller, PackageInstaller};

use crate::config::types::Result;
use std::path::PathBuf;

/// Install every batch of `plan` in order.
pub fn provision(
    plan: &InstallPlan,
    image_root: PathBuf,
    installer: &mut dyn PackageInstaller,
) -> Result<ProvisionedEnvironment> {
    let mut environment = ProvisionedEnvironment::new(image_root);

    for batch in &plan.batches {
        let installed = installer.install(batch).map_err(|e| {
            log::error!(
                "Provisioning aborted on {} batch from {}: {}",
                batch.ecosystem,
                batch.channel,
                e
            );
            e
        })?;
        environment.record(installed);
    }

    log::info!(
        "Provisioned {} package(s) in {} batch(es)",
        environment.package_count(),
        plan.batches.len()
    );
    Ok(environment)
}
