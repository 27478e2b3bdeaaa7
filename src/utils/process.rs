// pgdata-restorer/src/utils/process.rs
use std::io;
use std::path::PathBuf;
use std::process::Command;

use which::which;

use crate::errors::CommandError;

/// Captured result of one external command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Abstraction over the external processes the restore depends on.
/// Real implementation: `SystemCommandRunner`. Test double: `FakeCommandRunner`.
pub trait CommandRunner: Send + Sync {
    /// Resolves `name` on the executable search path.
    fn find_executable(&self, name: &str) -> Option<PathBuf>;

    /// Runs `program` to completion and captures its output.
    /// Only a failure to spawn is an `Err`; a non-zero exit is reported in the output.
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

/// Runs a command and turns a non-zero exit into a `CommandError`.
pub fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput, CommandError> {
    log::debug!("Running `{} {}`", program, args.join(" "));
    let output = runner.run(program, args).map_err(|source| CommandError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if !output.success() {
        return Err(CommandError::Failed {
            program: format!("{} {}", program, args.join(" ")),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// Runs commands on the host with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        which(name).ok()
    }

    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
