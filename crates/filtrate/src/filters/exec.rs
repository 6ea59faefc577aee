//! External tool execution for the built-in filters.

use crate::core::runtime::InitHandle;
use crate::{FiltrateError, Result};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::time::{Duration, timeout};

/// Default timeout for one external tool invocation (10 minutes)
pub const COMMAND_TIMEOUT_SECONDS: u64 = 600;

/// Options for [`run_command_with`].
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub cwd: Option<PathBuf>,
    /// Directories prepended to `LD_LIBRARY_PATH`
    pub library_path: Vec<PathBuf>,
    /// Extra environment variables for the child
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            library_path: Vec::new(),
            env: Vec::new(),
            timeout: Duration::from_secs(COMMAND_TIMEOUT_SECONDS),
        }
    }
}

/// Run `program` with `args` and return its stdout.
///
/// Arguments are passed straight to the process, never through a shell.
/// Returns `None` (after logging) when the program can't be started, exits
/// non-zero, or runs past the timeout.
pub async fn run_command<S: AsRef<OsStr>>(program: impl AsRef<OsStr>, args: &[S], cwd: Option<&Path>) -> Option<String> {
    let options = CommandOptions {
        cwd: cwd.map(Path::to_path_buf),
        ..CommandOptions::default()
    };
    run_command_with(program, args, &options).await
}

/// [`run_command`] with explicit [`CommandOptions`].
pub async fn run_command_with<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
    options: &CommandOptions,
) -> Option<String> {
    let program = program.as_ref();
    let cmdline = command_line(program, args);
    tracing::info!("Running {}", cmdline);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(cwd) = &options.cwd {
        command.current_dir(cwd);
    }

    if !options.library_path.is_empty() {
        command.env("LD_LIBRARY_PATH", library_path(&options.library_path));
    }
    command.envs(options.env.iter().map(|(key, value)| (key, value)));

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!("Failed to execute {}: {}", cmdline, e);
            return None;
        }
    };

    let output = match timeout(options.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::error!("Failed to wait for {}: {}", cmdline, e);
            return None;
        }
        Err(_) => {
            // child was consumed by wait_with_output(); kill_on_drop reaps it
            tracing::error!("{} timed out after {:?}", cmdline, options.timeout);
            return None;
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        tracing::error!(
            "{} exited with {}: {}{}",
            cmdline,
            output.status,
            String::from_utf8_lossy(&output.stdout),
            stderr
        );
        return None;
    }

    if !stderr.trim().is_empty() {
        tracing::debug!("{} stderr: {}", cmdline, stderr.trim());
    }

    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn command_line<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn library_path(dirs: &[PathBuf]) -> OsString {
    let mut paths: Vec<PathBuf> = dirs.to_vec();
    if let Some(existing) = std::env::var_os("LD_LIBRARY_PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_default()
}

/// Search `PATH` for an executable named `name`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

static IMAGEMAGICK_CONVERT: InitHandle<PathBuf> = InitHandle::new();

/// Location of ImageMagick's `convert`, resolved once per process.
///
/// # Errors
///
/// Returns `MissingDependency` when `convert` is not on `PATH`. The failure
/// is not cached; a later call searches again.
pub fn imagemagick_convert() -> Result<Arc<PathBuf>> {
    IMAGEMAGICK_CONVERT.ensure_initialized(|| {
        let convert = find_executable("convert").ok_or_else(|| {
            FiltrateError::MissingDependency("ImageMagick 'convert' was not found on PATH".to_string())
        })?;
        tracing::info!("Using ImageMagick convert at {}", convert.display());
        Ok(convert)
    })
}

/// Bio-Formats command line tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BfTools {
    pub showinf: PathBuf,
    pub bfconvert: PathBuf,
}

impl BfTools {
    /// Tools inside a bftools distribution directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            showinf: dir.join("showinf"),
            bfconvert: dir.join("bfconvert"),
        }
    }
}

static BFTOOLS: InitHandle<BfTools> = InitHandle::new();

/// Location of `showinf` and `bfconvert`, resolved once per process.
///
/// Both must be on `PATH`. As with [`imagemagick_convert`], a failed lookup
/// is retried on the next call.
pub fn bftools() -> Result<Arc<BfTools>> {
    BFTOOLS.ensure_initialized(|| {
        let missing = |tool: &str| FiltrateError::MissingDependency(format!("Bio-Formats '{}' was not found on PATH", tool));
        let tools = BfTools {
            showinf: find_executable("showinf").ok_or_else(|| missing("showinf"))?,
            bfconvert: find_executable("bfconvert").ok_or_else(|| missing("bfconvert"))?,
        };
        tracing::info!("Using Bio-Formats tools at {}", tools.showinf.display());
        Ok(tools)
    })
}
