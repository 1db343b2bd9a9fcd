use crate::config::manifest::BootManifest;
use crate::config::types::{BootError, Result};
use crate::config::validator::validate_manifest;
use crate::exec::command::WorkerCommand;
use crate::exec::forward::Supervisor;
use crate::layout::{self, BuildRecord, ImageLayout, STATE_DIR_NAME};
use crate::observability::audit::{self, LifecycleEventType};
use crate::provision::{self, InstallPlan, PackageInstaller, ProvisionedEnvironment};
/// Bootstrap lifecycle as a type-state chain
///
/// BuildPending -> Provisioned -> Configured -> Running
///
/// Each transition consumes the previous state and returns exactly one next
/// state on success. Only `Bootstrap<Configured>` can start the worker, so
/// the runtime config is always in place before the worker exists. In the run
/// phase `Configured` is re-entered from a completed build record instead of
/// by materializing again.
use std::convert::Infallible;
use std::path::{Path, PathBuf};

/// Type-state marker: manifest validated, nothing installed yet
pub struct BuildPending;

/// Type-state: every package batch installed
pub struct Provisioned {
    environment: ProvisionedEnvironment,
}

/// Type-state: source tree copied, runtime config materialized, build recorded
pub struct Configured {
    record: BuildRecord,
}

/// Type-state: worker running as a supervised child
pub struct Running {
    supervisor: Supervisor,
}

/// One container instance's bootstrap.
///
/// Starting the worker before provisioning and materialization does not
/// compile:
///
/// ```compile_fail
/// use bootbox::config::manifest::BootManifest;
/// use bootbox::exec::preexec::{Bootstrap, BuildPending};
///
/// let boot = Bootstrap::<BuildPending>::new(BootManifest::default()).unwrap();
/// let _ = boot.start(8881);
/// ```
///
/// ```compile_fail
/// use bootbox::config::manifest::BootManifest;
/// use bootbox::exec::preexec::{Bootstrap, BuildPending};
/// use bootbox::testing::IndexInstaller;
///
/// let mut installer = IndexInstaller::new();
/// let boot = Bootstrap::<BuildPending>::new(BootManifest::default())
///     .unwrap()
///     .provision(&mut installer)
///     .unwrap();
/// let _ = boot.start(8881);
/// ```
///
/// A consumed state cannot be reused:
///
/// ```compile_fail
/// use bootbox::config::manifest::BootManifest;
/// use bootbox::exec::preexec::{Bootstrap, BuildPending};
/// use bootbox::testing::IndexInstaller;
///
/// let mut installer = IndexInstaller::new();
/// let boot = Bootstrap::<BuildPending>::new(BootManifest::default()).unwrap();
/// let _first = boot.provision(&mut installer);
/// let _second = boot.provision(&mut installer);
/// ```
///
/// The full chain:
///
/// ```no_run
/// use bootbox::config::manifest::BootManifest;
/// use bootbox::exec::preexec::{Bootstrap, BuildPending};
/// use bootbox::provision::CommandInstaller;
///
/// # fn main() -> bootbox::Result<()> {
/// let manifest = BootManifest::load_default()?;
/// let mut installer = CommandInstaller::new(manifest.tools.clone());
/// let port = manifest.port;
/// let never = Bootstrap::<BuildPending>::new(manifest)?
///     .provision(&mut installer)?
///     .materialize_config()?
///     .start(port)?;
/// match never {}
/// # }
/// ```
pub struct Bootstrap<S> {
    manifest: BootManifest,
    layout: ImageLayout,
    build_id: String,
    state: S,
}

impl<S> Bootstrap<S> {
    pub fn manifest(&self) -> &BootManifest {
        &self.manifest
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    /// Correlates audit events of one build and the runs started from it
    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    fn advance<T>(self, state: T) -> Bootstrap<T> {
        Bootstrap {
            manifest: self.manifest,
            layout: self.layout,
            build_id: self.build_id,
            state,
        }
    }

    fn fail(&self, error: BootError) -> BootError {
        audit::failed(&self.build_id, error)
    }
}

impl Bootstrap<BuildPending> {
    /// Validate the manifest and open a new build
    pub fn new(manifest: BootManifest) -> Result<Self> {
        validate_manifest(&manifest)?;
        let layout = ImageLayout::from_manifest(&manifest);
        let build_id = uuid::Uuid::new_v4().to_string();

        audit::transition(
            LifecycleEventType::BuildStarted,
            &build_id,
            format!("image root {}", layout.root().display()),
        );

        Ok(Self {
            manifest,
            layout,
            build_id,
            state: BuildPending,
        })
    }

    /// Resolve the manifest's packages without installing anything
    pub fn plan(&self) -> Result<InstallPlan> {
        provision::resolve_plan(
            &self.manifest.channels,
            &self.manifest.system_packages,
            &self.manifest.python_packages,
        )
    }

    /// Install all packages. A previous build record is removed first, so a
    /// failed provisioning leaves the image root unusable for `start`.
    pub fn provision(
        self,
        installer: &mut dyn PackageInstaller,
    ) -> Result<Bootstrap<Provisioned>> {
        BuildRecord::remove(&self.layout.record_path()).map_err(|e| self.fail(e))?;

        let plan = self.plan().map_err(|e| self.fail(e))?;
        log::info!(
            "Provisioning {} package(s) in {} batch(es)",
            plan.package_count(),
            plan.batches.len()
        );

        let environment = provision::provision(&plan, self.layout.root().to_path_buf(), installer)
            .map_err(|e| self.fail(e))?;

        audit::transition(
            LifecycleEventType::Provisioned,
            &self.build_id,
            format!("{} package(s)", environment.package_count()),
        );
        Ok(self.advance(Provisioned { environment }))
    }
}

impl Bootstrap<Provisioned> {
    pub fn environment(&self) -> &ProvisionedEnvironment {
        &self.state.environment
    }

    /// Copy the source tree into the image root, materialize the runtime
    /// config from the template and write the build record.
    pub fn materialize_config(self) -> Result<Bootstrap<Configured>> {
        match self.populate() {
            Ok(record) => {
                audit::transition(
                    LifecycleEventType::Configured,
                    &self.build_id,
                    format!(
                        "{} sha256={}",
                        self.layout.config_path().display(),
                        record.config_sha256
                    ),
                );
                let Bootstrap {
                    manifest,
                    layout,
                    build_id,
                    ..
                } = self;
                Ok(Bootstrap {
                    manifest,
                    layout,
                    build_id,
                    state: Configured { record },
                })
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn populate(&self) -> Result<BuildRecord> {
        let source = self.manifest.source_root();
        let root = self.layout.root();

        if same_directory(&source, root) {
            log::info!(
                "Source tree already at image root {}; skipping copy",
                root.display()
            );
        } else {
            let skip = vec![root.to_path_buf(), source.join(STATE_DIR_NAME)];
            layout::copy_tree(&source, root, &skip)?;
        }

        let digest =
            layout::materialize_config(&self.manifest.template_path(), &self.layout.config_path())?;

        let record = BuildRecord::new(
            self.build_id.clone(),
            self.state.environment.packages().cloned().collect(),
            self.layout.config_target().to_string(),
            digest,
        );
        record.write(&self.layout.record_path())?;
        Ok(record)
    }
}

impl Bootstrap<Configured> {
    /// Re-enter `Configured` in the run phase from a completed build.
    ///
    /// Fails with `WorkerStartFailure` when there is no build record, the
    /// record names another config target, or the config changed since.
    pub fn from_build(manifest: BootManifest) -> Result<Self> {
        validate_manifest(&manifest)?;
        let layout = ImageLayout::from_manifest(&manifest);
        let record = BuildRecord::load(&layout.record_path())?;

        if record.config_target != layout.config_target() {
            return Err(audit::failed(
                &record.build_id,
                BootError::WorkerStartFailure(format!(
                    "build {} materialized '{}' but the manifest expects '{}'",
                    record.build_id,
                    record.config_target,
                    layout.config_target()
                )),
            ));
        }
        record
            .verify_config(&layout.config_path())
            .map_err(|e| audit::failed(&record.build_id, e))?;

        audit::transition(
            LifecycleEventType::BuildVerified,
            &record.build_id,
            format!("built at {}", record.built_at.to_rfc3339()),
        );

        Ok(Self {
            manifest,
            layout,
            build_id: record.build_id.clone(),
            state: Configured { record },
        })
    }

    pub fn record(&self) -> &BuildRecord {
        &self.state.record
    }

    /// Render the worker invocation for `port`
    pub fn command(&self, port: u16) -> Result<WorkerCommand> {
        if port == 0 {
            return Err(BootError::Config("port cannot be zero".to_string()));
        }
        WorkerCommand::render(&self.layout, port, &self.manifest.environment)
    }

    /// Replace this process with the worker.
    ///
    /// On success this never returns: the worker keeps our PID and receives
    /// the container's signals directly.
    pub fn start(self, port: u16) -> Result<Infallible> {
        let command = self.command(port).map_err(|e| self.fail(e))?;
        let program = command.c_program().map_err(|e| self.fail(e))?;
        let argv = command.c_argv().map_err(|e| self.fail(e))?;
        let env = command.c_env().map_err(|e| self.fail(e))?;

        nix::unistd::chdir(&command.workdir).map_err(|e| {
            self.fail(BootError::WorkerStartFailure(format!(
                "chdir {} failed: {}",
                command.workdir.display(),
                e
            )))
        })?;

        audit::transition(
            LifecycleEventType::WorkerStarting,
            &self.build_id,
            format!("exec {:?} on port {}", command.argv, port),
        );

        let err = match nix::unistd::execve(&program, &argv, &env) {
            Ok(never) => match never {},
            Err(e) => e,
        };
        Err(self.fail(BootError::WorkerStartFailure(format!(
            "exec {} failed: {}",
            command.program.display(),
            err
        ))))
    }

    /// Start the worker as a supervised child instead of replacing this
    /// process. Used when bootbox itself is PID 1.
    pub fn spawn_supervised(self, port: u16) -> Result<Bootstrap<Running>> {
        let command = self.command(port).map_err(|e| self.fail(e))?;
        let supervisor = Supervisor::spawn(&command).map_err(|e| self.fail(e))?;

        audit::transition(
            LifecycleEventType::WorkerStarting,
            &self.build_id,
            format!(
                "supervising pid {} {:?} on port {}",
                supervisor.child_pid(),
                command.argv,
                port
            ),
        );
        Ok(self.advance(Running { supervisor }))
    }
}

impl Bootstrap<Running> {
    pub fn child_pid(&self) -> i32 {
        self.state.supervisor.child_pid().as_raw()
    }

    /// Forward signals until the worker exits; returns its exit code
    pub fn wait(self) -> Result<i32> {
        let build_id = self.build_id;
        let code = self
            .state
            .supervisor
            .wait()
            .map_err(|e| audit::failed(&build_id, e))?;

        audit::transition(
            LifecycleEventType::WorkerExited,
            &build_id,
            format!("exit code {}", code),
        );
        Ok(code)
    }
}

fn same_directory(a: &Path, b: &Path) -> bool {
    let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| PathBuf::from(p));
    canonical(a) == canonical(b)
}

#[cfg(test)]
mod typestate_tests {
    use super::*;
    use crate::config::types::{Ecosystem, PackageSpec};
    use crate::testing::{ImageFixture, IndexInstaller};
    use std::fs;

    fn installer() -> IndexInstaller {
        IndexInstaller::new().with_system(["bash", "postgresql-dev"])
    }

    #[test]
    fn build_chain_reaches_configured() {
        let fixture = ImageFixture::new().unwrap();
        let boot = Bootstrap::<BuildPending>::new(fixture.manifest()).unwrap();
        let build_id = boot.build_id().to_string();

        let boot = boot.provision(&mut installer()).unwrap();
        assert!(boot.environment().contains(Ecosystem::System, "postgresql-dev"));

        let boot = boot.materialize_config().unwrap();
        assert_eq!(boot.build_id(), build_id);
        assert_eq!(boot.record().packages.len(), 2);
        assert_eq!(
            fs::read(boot.layout().config_path()).unwrap(),
            fs::read(fixture.template_path()).unwrap()
        );
        assert!(boot.layout().root().join("src/blockserver/server.py").exists());
    }

    #[test]
    fn run_phase_reenters_configured_from_the_record() {
        let fixture = ImageFixture::new().unwrap();
        let built = Bootstrap::<BuildPending>::new(fixture.manifest())
            .unwrap()
            .provision(&mut installer())
            .unwrap()
            .materialize_config()
            .unwrap();

        let resumed = Bootstrap::<Configured>::from_build(fixture.manifest()).unwrap();
        assert_eq!(resumed.build_id(), built.build_id());
        assert_eq!(resumed.record(), built.record());

        let command = resumed.command(8881).unwrap();
        assert_eq!(command.env_var("PORT"), Some(std::ffi::OsStr::new("8881")));
        assert_eq!(command.workdir, fixture.image_dir());
    }

    #[test]
    fn failed_provisioning_invalidates_the_previous_build() {
        let fixture = ImageFixture::new().unwrap();
        Bootstrap::<BuildPending>::new(fixture.manifest())
            .unwrap()
            .provision(&mut installer())
            .unwrap()
            .materialize_config()
            .unwrap();

        let mut manifest = fixture.manifest();
        manifest.system_packages.push(PackageSpec::new("invalid_pkg_x"));
        let err = Bootstrap::<BuildPending>::new(manifest)
            .unwrap()
            .provision(&mut installer())
            .err()
            .unwrap();
        assert!(matches!(err, BootError::DependencyInstallFailure { .. }));

        let err = Bootstrap::<Configured>::from_build(fixture.manifest())
            .err()
            .unwrap();
        assert!(matches!(err, BootError::WorkerStartFailure(_)));
    }

    #[test]
    fn missing_template_stops_before_the_record() {
        let fixture = ImageFixture::new().unwrap();
        fs::remove_file(fixture.template_path()).unwrap();

        let err = Bootstrap::<BuildPending>::new(fixture.manifest())
            .unwrap()
            .provision(&mut installer())
            .unwrap()
            .materialize_config()
            .err()
            .unwrap();
        assert!(matches!(err, BootError::MissingTemplate { .. }));
        assert!(!fixture.image_dir().join(".bootbox/build.json").exists());
        assert!(!fixture.image_dir().join("qabel.yaml").exists());
    }

    #[test]
    fn config_target_change_requires_rebuild() {
        let fixture = ImageFixture::new().unwrap();
        Bootstrap::<BuildPending>::new(fixture.manifest())
            .unwrap()
            .provision(&mut installer())
            .unwrap()
            .materialize_config()
            .unwrap();

        let mut manifest = fixture.manifest();
        manifest.config_target = "other.yaml".to_string();
        let err = Bootstrap::<Configured>::from_build(manifest).err().unwrap();
        assert!(err.to_string().contains("other.yaml"));
    }

    #[test]
    fn zero_port_is_rejected_at_start() {
        let fixture = ImageFixture::new().unwrap();
        let boot = Bootstrap::<BuildPending>::new(fixture.manifest())
            .unwrap()
            .provision(&mut installer())
            .unwrap()
            .materialize_config()
            .unwrap();

        let err = boot.start(0).err().unwrap();
        assert!(matches!(err, BootError::Config(_)));
    }

    #[test]
    fn invalid_manifest_never_opens_a_build() {
        let mut manifest = BootManifest::default();
        manifest.entrypoint.clear();
        assert!(Bootstrap::<BuildPending>::new(manifest).is_err());
    }
}
