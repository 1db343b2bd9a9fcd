// Manifest validation
// Fail fast at startup with every actionable error reported together

use crate::config::manifest::BootManifest;
use crate::config::types::{BootError, Channel, PackageSpec, Result};
use std::path::{Component, Path};

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate the manifest; any error is fatal
pub fn validate_manifest(manifest: &BootManifest) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_paths(manifest, &mut result);
    validate_entrypoint(manifest, &mut result);
    validate_packages(manifest, &mut result);

    if manifest.port == 0 {
        result.add_error("port cannot be zero".to_string());
    } else if manifest.port < 1024 {
        result.add_warning(format!(
            "port {} is privileged; the worker needs CAP_NET_BIND_SERVICE to bind it",
            manifest.port
        ));
    }

    for warning in &result.warnings {
        log::warn!("Manifest: {}", warning);
    }

    if !result.is_valid() {
        return Err(BootError::Config(format!(
            "Manifest validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

/// True when `name` is a single plain file name with no directory parts
pub fn is_bare_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('/')
}

/// Package names the installers accept: no whitespace, no option-like prefix,
/// no shell or apk dependency operators
pub fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'))
}

fn validate_paths(manifest: &BootManifest, result: &mut ValidationResult) {
    if !is_bare_file_name(&manifest.config_target) {
        result.add_error(format!(
            "config_target must be a bare file name inside the image root: {:?}",
            manifest.config_target
        ));
    }

    if manifest.template.is_absolute() {
        result.add_error(format!(
            "template must be relative to the source directory: {}",
            manifest.template.display()
        ));
    }
    if manifest
        .template
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        result.add_error(format!(
            "template must not escape the source directory: {}",
            manifest.template.display()
        ));
    }

    if manifest.config_target == crate::layout::STATE_DIR_NAME {
        result.add_error(format!(
            "config_target collides with the bootbox state directory {}",
            crate::layout::STATE_DIR_NAME
        ));
    }
}

fn validate_entrypoint(manifest: &BootManifest, result: &mut ValidationResult) {
    match manifest.entrypoint.first() {
        None => result.add_error("entrypoint cannot be empty".to_string()),
        Some(program) if program.trim().is_empty() => {
            result.add_error("entrypoint program cannot be blank".to_string())
        }
        Some(_) => {}
    }

    if manifest.entrypoint.iter().any(|arg| arg.contains('\0')) {
        result.add_error("entrypoint arguments cannot contain NUL bytes".to_string());
    }

    if !manifest
        .entrypoint
        .iter()
        .any(|arg| arg.contains(crate::exec::command::PORT_PLACEHOLDER))
        && !manifest.environment.contains_key(crate::exec::command::PORT_ENV_VAR)
    {
        result.add_warning(format!(
            "entrypoint does not reference {}; the worker must read the port from ${}",
            crate::exec::command::PORT_PLACEHOLDER,
            crate::exec::command::PORT_ENV_VAR
        ));
    }
}

fn validate_packages(manifest: &BootManifest, result: &mut ValidationResult) {
    let all = manifest
        .system_packages
        .iter()
        .chain(manifest.python_packages.iter());

    for spec in all {
        validate_package(manifest, spec, result);
    }

    for (tag, url) in &manifest.channels {
        if !is_valid_package_name(tag) {
            result.add_error(format!("invalid channel tag: {:?}", tag));
        }
        if url.trim().is_empty() {
            result.add_error(format!("channel '{}' has an empty repository URL", tag));
        }
    }

    if manifest.system_packages.is_empty() && manifest.python_packages.is_empty() {
        result.add_warning("no packages declared; provisioning is a no-op".to_string());
    }
}

fn validate_package(manifest: &BootManifest, spec: &PackageSpec, result: &mut ValidationResult) {
    if !is_valid_package_name(&spec.name) {
        result.add_error(format!("invalid package name: {:?}", spec.name));
    }

    if let Some(version) = &spec.version {
        if version.is_empty() || version.chars().any(char::is_whitespace) {
            result.add_error(format!(
                "invalid version {:?} for package {}",
                version, spec.name
            ));
        }
    }

    if let Channel::Pinned(tag) = &spec.channel {
        if !manifest.channels.contains_key(tag) {
            result.add_error(format!(
                "package {} references undeclared channel '{}'",
                spec.name, tag
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> BootManifest {
        let mut manifest = BootManifest::default();
        manifest.entrypoint = vec!["Docker/entrypoint.sh".into(), "--port={port}".into()];
        manifest.system_packages = vec![PackageSpec::new("bash")];
        manifest
    }

    #[test]
    fn default_shaped_manifest_is_valid() {
        let result = validate_manifest(&manifest()).unwrap();
        assert!(result.is_valid());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn nested_config_target_is_rejected() {
        let mut manifest = manifest();
        manifest.config_target = "conf/qabel.yaml".into();
        assert!(matches!(
            validate_manifest(&manifest),
            Err(BootError::Config(_))
        ));

        manifest.config_target = "..".into();
        assert!(validate_manifest(&manifest).is_err());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut manifest = manifest();
        manifest.port = 0;
        let err = validate_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("port cannot be zero"));
    }

    #[test]
    fn undeclared_channel_is_reported() {
        let mut manifest = manifest();
        manifest
            .system_packages
            .push(PackageSpec::new("postgresql-dev").with_channel(Channel::pinned("edge")));
        let err = validate_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("undeclared channel 'edge'"));
    }

    #[test]
    fn all_errors_are_reported_together() {
        let mut manifest = manifest();
        manifest.port = 0;
        manifest.entrypoint.clear();
        manifest.system_packages.push(PackageSpec::new("bad name"));
        let err = validate_manifest(&manifest).unwrap_err().to_string();
        assert!(err.contains("port cannot be zero"));
        assert!(err.contains("entrypoint cannot be empty"));
        assert!(err.contains("invalid package name"));
    }

    #[test]
    fn package_name_rules() {
        assert!(is_valid_package_name("postgresql-dev"));
        assert!(is_valid_package_name("py3-setuptools"));
        assert!(is_valid_package_name("libstdc++"));
        assert!(!is_valid_package_name(""));
        assert!(!is_valid_package_name("--allow-untrusted"));
        assert!(!is_valid_package_name("bash; rm -rf /"));
        assert!(!is_valid_package_name("bash@edge"));
    }

    #[test]
    fn bare_file_name_rules() {
        assert!(is_bare_file_name("qabel.yaml"));
        assert!(!is_bare_file_name("a/b.yaml"));
        assert!(!is_bare_file_name("/qabel.yaml"));
        assert!(!is_bare_file_name(".."));
        assert!(!is_bare_file_name(""));
    }
}
