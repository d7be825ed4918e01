//! Thin wrapper over `std::process::Command` used by every parser.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::{Error, Result};

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl Output {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `program args…` in `dir` and capture its output regardless of exit status.
///
/// A program missing from `PATH` maps to [`Error::ToolingAbsent`].
pub fn output<I, S>(program: &str, args: I, dir: &Path) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    debug!(program, ?args, dir = %dir.display(), "running command");

    let result = Command::new(program).args(&args).current_dir(dir).output();
    let out = match result {
        Ok(out) => out,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::tooling_absent(program));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Output {
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        code: out.status.code(),
    })
}

/// Run a command and return stdout, failing on a non-zero exit.
pub fn run<I, S>(program: &str, args: I, dir: &Path) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let out = output(program, args, dir)?;
    if !out.success() {
        return Err(Error::Command {
            program: program.to_string(),
            status: out
                .code
                .map(|c| format!("exit code {}", c))
                .unwrap_or_else(|| "terminated by signal".to_string()),
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(out.stdout)
}

/// True when `program` resolves to a file on `PATH` (or is an existing path).
pub fn exists(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let full = dir.join(program);
        full.is_file() || (cfg!(windows) && full.with_extension("exe").is_file())
    })
}
