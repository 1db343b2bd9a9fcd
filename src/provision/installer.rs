use crate::config::manifest::ToolConfig;
use crate::config::types::{BootError, Channel, Ecosystem, InstalledPackage, Result};
use crate::provision::channel::InstallBatch;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Command;

/// Installer contract for one package ecosystem batch.
pub trait PackageInstaller {
    /// Install every package in `batch` or fail; there is no partial success.
    fn install(&mut self, batch: &InstallBatch) -> Result<Vec<InstalledPackage>>;
}

/// Installs packages by running the configured apk/pip command lines.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    tools: ToolConfig,
}

impl CommandInstaller {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }

    /// Arguments appended to the system tool for this batch
    pub fn system_args(batch: &InstallBatch) -> Vec<String> {
        // apk dependency syntax: name[@tag][=version]
        batch.packages.iter().map(|p| p.to_string()).collect()
    }

    /// Arguments appended to the python tool for this batch
    pub fn python_args(batch: &InstallBatch) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(index) = &batch.repository {
            args.push("--index-url".to_string());
            args.push(index.clone());
        }
        for package in &batch.packages {
            match &package.version {
                Some(version) => args.push(format!("{}=={}", package.name, version)),
                None => args.push(package.name.clone()),
            }
        }
        args
    }

    /// Full installer argv for a batch
    pub fn command_for(&self, batch: &InstallBatch) -> Vec<String> {
        let (prefix, args) = match batch.ecosystem {
            Ecosystem::System => (&self.tools.system, Self::system_args(batch)),
            Ecosystem::Python => (&self.tools.python, Self::python_args(batch)),
        };
        prefix.iter().cloned().chain(args).collect()
    }

    fn run(&self, batch: &InstallBatch, argv: &[String]) -> Result<()> {
        let packages = batch.package_names().join(" ");
        let (program, args) = argv.split_first().ok_or_else(|| {
            BootError::install(
                packages.clone(),
                format!("no {} installer command configured", batch.ecosystem),
            )
        })?;

        log::info!(
            "Installing {} {} package(s) from {}: {}",
            batch.packages.len(),
            batch.ecosystem,
            batch.channel,
            packages
        );
        log::debug!("Installer command: {:?}", argv);

        let status = Command::new(program).args(args).status().map_err(|e| {
            BootError::install(
                packages.clone(),
                format!("failed to run installer {}: {}", program, e),
            )
        })?;

        if !status.success() {
            let reason = match status.code() {
                Some(code) => format!("{} exited with status {}", program, code),
                None => format!("{} was terminated by a signal", program),
            };
            return Err(BootError::install(packages, reason));
        }

        Ok(())
    }
}

impl PackageInstaller for CommandInstaller {
    fn install(&mut self, batch: &InstallBatch) -> Result<Vec<InstalledPackage>> {
        if batch.packages.is_empty() {
            return Ok(Vec::new());
        }

        if let (Ecosystem::System, Channel::Pinned(tag)) = (batch.ecosystem, &batch.channel) {
            let url = batch.repository.as_deref().ok_or_else(|| {
                BootError::install(
                    batch.package_names().join(" "),
                    format!("channel '{}' has no repository", tag),
                )
            })?;
            register_tagged_repository(&self.tools.repositories_file, tag, url).map_err(|e| {
                BootError::install(
                    batch.package_names().join(" "),
                    format!(
                        "failed to register channel '{}' in {}: {}",
                        tag,
                        self.tools.repositories_file.display(),
                        e
                    ),
                )
            })?;
        }

        let argv = self.command_for(batch);
        self.run(batch, &argv)?;

        Ok(batch
            .packages
            .iter()
            .map(|spec| InstalledPackage::from_spec(batch.ecosystem, spec))
            .collect())
    }
}

/// Ensure `@tag url` is listed in the apk repositories file.
/// Re-registering an existing tag line is a no-op.
pub fn register_tagged_repository(path: &Path, tag: &str, url: &str) -> std::io::Result<()> {
    let line = format!("@{} {}", tag, url);
    let existing = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    if existing.lines().any(|l| l.trim() == line) {
        log::debug!("Channel '{}' already registered in {}", tag, path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}", line)?;
    log::info!("Registered channel '{}' ({}) in {}", tag, url, path.display());
    Ok(())
}
