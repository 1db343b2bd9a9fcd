use crate::config::types::{BootError, Result};
use crate::layout::ImageLayout;
use std::collections::BTreeMap;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Placeholder in entrypoint arguments replaced by the bound port
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Placeholder in entrypoint arguments replaced by the runtime config path
pub const CONFIG_PLACEHOLDER: &str = "{config}";

/// Environment variable carrying the bound port to the worker
pub const PORT_ENV_VAR: &str = "PORT";

/// Environment variable carrying the runtime config path to the worker
pub const CONFIG_ENV_VAR: &str = "BOOTBOX_CONFIG";

/// PATH used when neither the process nor the manifest defines one
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Fully rendered worker invocation.
///
/// argv and environment are kept as raw OS strings: inherited variables and
/// the image root path need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Resolved executable
    pub program: PathBuf,
    /// argv as the worker sees it, argv[0] included
    pub argv: Vec<OsString>,
    pub workdir: PathBuf,
    pub env: BTreeMap<OsString, OsString>,
    pub port: u16,
}

impl WorkerCommand {
    /// Render the layout's entrypoint for `port`.
    ///
    /// Environment precedence, lowest first: inherited process environment,
    /// manifest `environment`, then `PORT` and `BOOTBOX_CONFIG`.
    pub fn render(
        layout: &ImageLayout,
        port: u16,
        extra_env: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let config = layout.config_path().into_os_string();
        let port_text = port.to_string();

        let argv: Vec<OsString> = layout
            .entrypoint()
            .iter()
            .map(|arg| substitute(arg, &port_text, &config))
            .collect();

        let first = argv
            .first()
            .ok_or_else(|| BootError::WorkerStartFailure("entrypoint is empty".to_string()))?;

        let mut env: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
        env.extend(
            extra_env
                .iter()
                .map(|(k, v)| (OsString::from(k), OsString::from(v))),
        );
        env.insert(PORT_ENV_VAR.into(), port_text.into());
        env.insert(CONFIG_ENV_VAR.into(), config);

        let search_path = env
            .get(OsStr::new("PATH"))
            .cloned()
            .unwrap_or_else(|| DEFAULT_PATH.into());
        let program = resolve_program(first, layout.root(), &search_path)?;

        Ok(Self {
            program,
            argv,
            workdir: layout.root().to_path_buf(),
            env,
            port,
        })
    }

    /// Value the worker will see for `key`
    pub fn env_var(&self, key: &str) -> Option<&OsStr> {
        self.env.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    pub fn c_program(&self) -> Result<CString> {
        to_cstring(self.program.as_os_str().as_bytes().to_vec())
    }

    pub fn c_argv(&self) -> Result<Vec<CString>> {
        self.argv
            .iter()
            .map(|a| to_cstring(a.as_bytes().to_vec()))
            .collect()
    }

    pub fn c_env(&self) -> Result<Vec<CString>> {
        self.env
            .iter()
            .map(|(k, v)| {
                let mut entry = k.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(v.as_bytes());
                to_cstring(entry)
            })
            .collect()
    }
}

/// Replace `{port}` and `{config}` in one argument, keeping the config path
/// as raw bytes
fn substitute(arg: &str, port: &str, config: &OsStr) -> OsString {
    let mut out = Vec::with_capacity(arg.len());
    for (i, piece) in arg.split(CONFIG_PLACEHOLDER).enumerate() {
        if i > 0 {
            out.extend_from_slice(config.as_bytes());
        }
        out.extend_from_slice(piece.replace(PORT_PLACEHOLDER, port).as_bytes());
    }
    OsString::from_vec(out)
}

fn to_cstring(bytes: Vec<u8>) -> Result<CString> {
    CString::new(bytes).map_err(|e| {
        BootError::WorkerStartFailure(format!(
            "argument contains NUL byte: {:?}",
            OsStr::from_bytes(&e.into_vec())
        ))
    })
}

/// Resolve the entrypoint program the way execvp would, but up front so a
/// missing or non-executable worker is reported before the bootstrap is gone.
///
/// Names containing `/` are taken relative to `workdir`; bare names are
/// searched in `search_path`.
pub fn resolve_program(program: &OsStr, workdir: &Path, search_path: &OsStr) -> Result<PathBuf> {
    if program.as_bytes().contains(&b'/') {
        let candidate = if Path::new(program).is_absolute() {
            PathBuf::from(program)
        } else {
            workdir.join(program)
        };
        return check_executable(&candidate).map(|_| candidate);
    }

    for dir in std::env::split_paths(search_path).filter(|d| !d.as_os_str().is_empty()) {
        let candidate = dir.join(program);
        if check_executable(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    Err(BootError::WorkerStartFailure(format!(
        "entrypoint {:?} not found in PATH",
        program
    )))
}

fn check_executable(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        BootError::WorkerStartFailure(format!("entrypoint {}: {}", path.display(), e))
    })?;

    if !metadata.is_file() {
        return Err(BootError::WorkerStartFailure(format!(
            "entrypoint {} is not a regular file",
            path.display()
        )));
    }
    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(BootError::WorkerStartFailure(format!(
            "entrypoint {} is not executable",
            path.display()
        )));
    }
    Ok(())
}
