//! Command execution abstraction with dry-run support.
//!
//! External tools (`mount`, `umount`, `cryptsetup`, `lsblk`) are located by
//! searching the configured execution directories before `PATH`, then run to
//! completion with captured output.

use std::ffi::OsStr;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::{debug, info};

use crate::error::{Error, IoResultExt, Result};
use crate::settings::Settings;

/// Runs an external program and returns its standard output.
///
/// Implementations must fail with [`Error::CommandFailed`] when the program
/// exits unsuccessfully.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Execution context for running system commands.
///
/// # Example
///
/// ```
/// use fmount_core::executor::{CommandRunner, ExecutionContext};
/// use fmount_core::settings::Settings;
///
/// let settings = Settings {
///     dry_run: true,
///     ..Settings::default()
/// };
/// let ctx = ExecutionContext::new(&settings);
/// let output = ctx.run("umount", &["/media/stick".to_string()]).unwrap();
/// assert!(output.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    exec_dirs: Vec<PathBuf>,
    dry_run: bool,
}

impl ExecutionContext {
    /// Creates a context from the run settings.
    pub fn new(settings: &Settings) -> Self {
        Self {
            exec_dirs: settings.exec_dirs.clone(),
            dry_run: settings.dry_run,
        }
    }

    /// Locates a program in the execution directories, then `PATH`.
    pub fn locate(&self, program: &str) -> Result<PathBuf> {
        if Path::new(program).is_absolute() {
            return Ok(PathBuf::from(program));
        }

        if !self.exec_dirs.is_empty()
            && let Ok(joined) = std::env::join_paths(&self.exec_dirs)
            && let Ok(path) = which::which_in(program, Some(joined), "/")
        {
            return Ok(path);
        }

        which::which(program).map_err(|_| Error::CommandNotFound {
            program: program.to_string(),
            searched: self
                .exec_dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(":"),
        })
    }

    /// Runs a read-only query. Executes even in dry-run mode.
    pub fn query(&self, program: &str, args: &[&str]) -> Result<String> {
        let binary = self.locate(program)?;
        let output = spawn(&binary, args)?;
        check_output(&command_line(program, args), output)
    }
}

impl CommandRunner for ExecutionContext {
    fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let line = command_line(program, args);

        if self.dry_run {
            info!("dry run, not executing: {}", line);
            return Ok(String::new());
        }

        let binary = self.locate(program)?;
        debug!("executing: {}", line);
        let output = spawn(&binary, args)?;
        check_output(&line, output)
    }
}

fn spawn<S: AsRef<OsStr>>(binary: &Path, args: &[S]) -> Result<Output> {
    Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .command_context(binary.display().to_string())
}

/// Maps a finished process into stdout or [`Error::CommandFailed`].
fn check_output(line: &str, output: Output) -> Result<String> {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();

    if output.status.success() {
        return Ok(stdout);
    }

    let status = match output.status.code() {
        Some(code) => code,
        None => -output.status.signal().unwrap_or(0),
    };
    let stderr = String::from_utf8_lossy(&output.stderr);
    let captured = format!("{}{}", stdout, stderr).trim().to_string();

    Err(Error::CommandFailed {
        command: line.to_string(),
        status,
        output: captured,
    })
}

/// Renders a command for messages.
pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg.as_ref());
    }
    line
}
