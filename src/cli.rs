use crate::config::manifest::BootManifest;
use crate::config::types::BootError;
use crate::config::validator::validate_manifest;
use crate::exec::preexec::{Bootstrap, BuildPending, Configured};
use crate::provision::{resolve_plan, CommandInstaller};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Container bootstrap: provision, materialize config, exec the worker", long_about = None)]
struct Cli {
    /// Build manifest (default: $BOOTBOX_MANIFEST, then ./bootbox.json)
    #[arg(long, global = true, value_name = "PATH")]
    manifest: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages, copy the source tree and materialize the runtime config
    Build,
    /// Start the worker from a completed build
    Start {
        #[command(flatten)]
        launch: LaunchArgs,
    },
    /// Build, then start the worker in the same process
    Run {
        #[command(flatten)]
        launch: LaunchArgs,
    },
    /// Print the resolved install plan as JSON without installing anything
    Plan,
    /// Verify the build record and runtime config without starting the worker
    Check,
}

#[derive(clap::Args)]
struct LaunchArgs {
    /// Port the worker binds (overrides the manifest)
    #[arg(long)]
    port: Option<u16>,
    /// Keep bootbox as a signal-forwarding parent instead of exec-ing the worker
    #[arg(long)]
    supervise: bool,
}

/// Entry point for the bootbox binary.
///
/// Exits with the worker's status in supervise mode; on failure prints the
/// error chain and exits with the code mapped from [`BootError`].
pub fn run() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match dispatch(cli) {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let code = err.downcast_ref::<BootError>().map(i32::from).unwrap_or(1);
            eprintln!("Error: {:#}", err);
            std::process::exit(code);
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32> {
    let manifest = load_manifest(cli.manifest)?;

    match cli.command {
        Commands::Build => {
            let configured = build(manifest)?;
            println!(
                "build {} complete: {} package(s), {} sha256={}",
                configured.build_id(),
                configured.record().packages.len(),
                configured.layout().config_path().display(),
                configured.record().config_sha256
            );
            Ok(0)
        }
        Commands::Start { launch } => {
            let configured = Bootstrap::<Configured>::from_build(manifest)?;
            launch_worker(configured, &launch)
        }
        Commands::Run { launch } => {
            let configured = build(manifest)?;
            launch_worker(configured, &launch)
        }
        Commands::Plan => {
            validate_manifest(&manifest)?;
            let plan = resolve_plan(
                &manifest.channels,
                &manifest.system_packages,
                &manifest.python_packages,
            )?;
            let installer = CommandInstaller::new(manifest.tools.clone());
            let batches: Vec<serde_json::Value> = plan
                .batches
                .iter()
                .map(|batch| {
                    serde_json::json!({
                        "ecosystem": batch.ecosystem,
                        "channel": batch.channel,
                        "repository": batch.repository,
                        "packages": batch.packages,
                        "command": installer.command_for(batch),
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "batches": batches }))?
            );
            Ok(0)
        }
        Commands::Check => {
            let configured = Bootstrap::<Configured>::from_build(manifest)?;
            println!("{}", serde_json::to_string_pretty(configured.record())?);
            Ok(0)
        }
    }
}

fn load_manifest(path: Option<PathBuf>) -> Result<BootManifest> {
    let manifest = match path {
        Some(path) => BootManifest::load_from_file(&path)
            .with_context(|| format!("loading manifest {}", path.display()))?,
        None => BootManifest::load_default()?,
    };
    Ok(manifest)
}

fn build(manifest: BootManifest) -> Result<Bootstrap<Configured>> {
    let mut installer = CommandInstaller::new(manifest.tools.clone());
    let configured = Bootstrap::<BuildPending>::new(manifest)?
        .provision(&mut installer)?
        .materialize_config()?;
    Ok(configured)
}

fn launch_worker(configured: Bootstrap<Configured>, launch: &LaunchArgs) -> Result<i32> {
    let port = launch.port.unwrap_or(configured.manifest().port);

    if launch.supervise {
        let code = configured.spawn_supervised(port)?.wait()?;
        return Ok(code);
    }

    let never: Infallible = configured.start(port)?;
    match never {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_accepts_port_override_and_supervise() {
        let cli = Cli::try_parse_from([
            "bootbox",
            "--manifest",
            "/etc/bootbox.json",
            "start",
            "--port",
            "9000",
            "--supervise",
        ])
        .unwrap();

        assert_eq!(cli.manifest, Some(PathBuf::from("/etc/bootbox.json")));
        match cli.command {
            Commands::Start { launch } => {
                assert_eq!(launch.port, Some(9000));
                assert!(launch.supervise);
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn manifest_flag_is_global() {
        let cli = Cli::try_parse_from(["bootbox", "plan", "--manifest", "m.json"]).unwrap();
        assert_eq!(cli.manifest, Some(PathBuf::from("m.json")));
        assert!(matches!(cli.command, Commands::Plan));
    }

    #[test]
    fn port_must_fit_u16() {
        assert!(Cli::try_parse_from(["bootbox", "start", "--port", "70000"]).is_err());
    }
}
