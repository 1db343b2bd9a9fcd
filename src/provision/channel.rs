//! Channel resolution
//!
//! Groups the manifest's package lists into install batches, one per
//! (ecosystem, channel) pair. Resolution is a pure function of its inputs so
//! the same manifest always yields the same plan.

use crate::config::types::{BootError, Channel, Ecosystem, PackageSpec, Result};
use crate::config::validator::is_valid_package_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Packages installed with one installer invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallBatch {
    pub ecosystem: Ecosystem,
    pub channel: Channel,
    /// Repository URL for pinned channels
    pub repository: Option<String>,
    pub packages: Vec<PackageSpec>,
}

impl InstallBatch {
    pub fn package_names(&self) -> Vec<&str> {
        self.packages.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Ordered install batches: system before python, stable before pinned
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPlan {
    pub batches: Vec<InstallBatch>,
}

impl InstallPlan {
    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(|b| b.packages.is_empty())
    }

    pub fn package_count(&self) -> usize {
        self.batches.iter().map(|b| b.packages.len()).sum()
    }
}

/// Resolve every package to its declared channel and group into batches.
///
/// Fails with `DependencyInstallFailure` for an invalid name, an undeclared
/// channel, or the same package requested twice with different pins.
pub fn resolve_plan(
    channels: &BTreeMap<String, String>,
    system: &[PackageSpec],
    python: &[PackageSpec],
) -> Result<InstallPlan> {
    let mut batches = Vec::new();
    for (ecosystem, specs) in [(Ecosystem::System, system), (Ecosystem::Python, python)] {
        batches.extend(resolve_ecosystem(channels, ecosystem, specs)?);
    }
    Ok(InstallPlan { batches })
}

fn resolve_ecosystem(
    channels: &BTreeMap<String, String>,
    ecosystem: Ecosystem,
    specs: &[PackageSpec],
) -> Result<Vec<InstallBatch>> {
    let mut seen: BTreeMap<&str, &PackageSpec> = BTreeMap::new();
    let mut grouped: BTreeMap<Channel, Vec<PackageSpec>> = BTreeMap::new();

    for spec in specs {
        if !is_valid_package_name(&spec.name) {
            return Err(BootError::install(
                spec.name.clone(),
                format!("invalid {} package name", ecosystem),
            ));
        }

        if let Channel::Pinned(tag) = &spec.channel {
            if !channels.contains_key(tag) {
                return Err(BootError::install(
                    spec.to_string(),
                    format!("channel '{}' is not declared", tag),
                ));
            }
        }

        match seen.get(spec.name.as_str()) {
            Some(previous) if *previous == spec => continue,
            Some(previous) => {
                return Err(BootError::install(
                    spec.name.clone(),
                    format!("conflicting requests {} and {}", previous, spec),
                ));
            }
            None => {
                seen.insert(spec.name.as_str(), spec);
            }
        }

        grouped
            .entry(spec.channel.clone())
            .or_default()
            .push(spec.clone());
    }

    Ok(grouped
        .into_iter()
        .map(|(channel, mut packages)| {
            packages.sort();
            let repository = channel.tag().and_then(|tag| channels.get(tag).cloned());
            InstallBatch {
                ecosystem,
                channel,
                repository,
                packages,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge() -> BTreeMap<String, String> {
        let mut channels = BTreeMap::new();
        channels.insert(
            "edge".to_string(),
            "http://dl-cdn.alpinelinux.org/alpine/edge/main".to_string(),
        );
        channels
    }

    #[test]
    fn pinned_package_gets_its_own_batch() {
        let system = vec![
            PackageSpec::new("postgresql-dev").with_channel(Channel::pinned("edge")),
            PackageSpec::new("bash"),
            PackageSpec::new("gcc"),
        ];
        let python = vec![PackageSpec::new("tornado").with_version("4.3")];

        let plan = resolve_plan(&edge(), &system, &python).unwrap();
        assert_eq!(plan.batches.len(), 3);

        assert_eq!(plan.batches[0].ecosystem, Ecosystem::System);
        assert_eq!(plan.batches[0].channel, Channel::Stable);
        assert_eq!(plan.batches[0].package_names(), vec!["bash", "gcc"]);
        assert_eq!(plan.batches[0].repository, None);

        assert_eq!(plan.batches[1].channel, Channel::pinned("edge"));
        assert_eq!(plan.batches[1].package_names(), vec!["postgresql-dev"]);
        assert_eq!(
            plan.batches[1].repository.as_deref(),
            Some("http://dl-cdn.alpinelinux.org/alpine/edge/main")
        );

        assert_eq!(plan.batches[2].ecosystem, Ecosystem::Python);
        assert_eq!(plan.package_count(), 4);
    }

    #[test]
    fn resolution_ignores_declaration_order() {
        let a = vec![PackageSpec::new("bash"), PackageSpec::new("gcc")];
        let b = vec![PackageSpec::new("gcc"), PackageSpec::new("bash")];
        assert_eq!(
            resolve_plan(&edge(), &a, &[]).unwrap(),
            resolve_plan(&edge(), &b, &[]).unwrap()
        );
    }

    #[test]
    fn undeclared_channel_fails_resolution() {
        let system = vec![PackageSpec::new("musl").with_channel(Channel::pinned("testing"))];
        let err = resolve_plan(&edge(), &system, &[]).unwrap_err();
        assert!(matches!(err, BootError::DependencyInstallFailure { .. }));
        assert!(err.to_string().contains("testing"));
    }

    #[test]
    fn exact_duplicates_collapse_and_conflicts_fail() {
        let system = vec![PackageSpec::new("bash"), PackageSpec::new("bash")];
        let plan = resolve_plan(&edge(), &system, &[]).unwrap();
        assert_eq!(plan.package_count(), 1);

        let system = vec![
            PackageSpec::new("bash"),
            PackageSpec::new("bash").with_channel(Channel::pinned("edge")),
        ];
        assert!(matches!(
            resolve_plan(&edge(), &system, &[]),
            Err(BootError::DependencyInstallFailure { .. })
        ));
    }

    #[test]
    fn same_name_in_both_ecosystems_is_allowed() {
        let system = vec![PackageSpec::new("py3-psycopg2")];
        let python = vec![PackageSpec::new("py3-psycopg2")];
        let plan = resolve_plan(&edge(), &system, &python).unwrap();
        assert_eq!(plan.batches.len(), 2);
    }

    #[test]
    fn empty_lists_give_empty_plan() {
        let plan = resolve_plan(&BTreeMap::new(), &[], &[]).unwrap();
        assert!(plan.is_empty());
    }
}
