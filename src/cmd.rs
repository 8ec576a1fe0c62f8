use std::env;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{self, Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Program to spawn as the traced child process.
#[derive(Clone, Debug)]
pub struct Command {
    /// Path of the instrumented binary. Its symbols are listed from this same path.
    program: PathBuf,

    args: Vec<OsString>,
}

impl Command {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let args = vec![];

        Self { program, args }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Pin the program to one path, so symbols are listed from the binary that is spawned.
    ///
    /// See [`resolve_program`].
    pub fn resolve(mut self) -> Self {
        self.program = resolve_program(&self.program, env::var_os("PATH").as_deref());
        self
    }

    /// Start the program with inherited stdio.
    pub fn spawn(&self) -> Result<Tracee> {
        let child = process::Command::new(&self.program)
            .args(&self.args)
            .spawn()
            .map_err(|source| Error::Spawn { program: self.program.display().to_string(), source })?;

        info!(pid = child.id(), program = ?self.program, "spawned traced program");

        Ok(Tracee { child, status: None })
    }
}

/// Locate `program` the way a shell would.
///
/// Paths containing a `/` are kept as-is. A bare name is looked up in the `search` dirs
/// (`PATH` syntax) for an executable file, and falls back to `./<name>`.
pub fn resolve_program(program: &Path, search: Option<&OsStr>) -> PathBuf {
    if program.as_os_str().as_bytes().contains(&b'/') {
        return program.to_owned();
    }

    let found = search
        .into_iter()
        .flat_map(|paths| env::split_paths(paths))
        .map(|dir| {
            // An empty entry means the current directory.
            if dir.as_os_str().is_empty() { Path::new(".").join(program) } else { dir.join(program) }
        })
        .find(|candidate| is_executable(candidate));

    match found {
        Some(path) => path,
        None => Path::new(".").join(program),
    }
}

fn is_executable(path: &Path) -> bool {
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Running traced program.
///
/// Dropping a tracee that was not reaped kills it, then waits for it.
#[derive(Debug)]
pub struct Tracee {
    child: Child,
    status: Option<ExitStatus>,
}

impl Tracee {
    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    /// Exit status, once reaped.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Wait up to `grace` for the program to exit on its own, then kill it.
    ///
    /// Checks for exit every `poll_delay`.
    pub fn reap(&mut self, grace: Duration, poll_delay: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let deadline = Instant::now() + grace;

        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(self.reaped(status));
            }

            if Instant::now() >= deadline {
                debug!(pid = self.child.id(), "traced program still running after grace period");
                return self.kill();
            }

            thread::sleep(poll_delay);
        }
    }

    /// Kill the program and wait for it.
    pub fn kill(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        // Fails with `InvalidInput` if it already exited, which `wait()` then observes.
        if let Err(err) = self.child.kill() {
            debug!(pid = self.child.id(), %err, "kill failed");
        }

        let status = self.child.wait()?;

        Ok(self.reaped(status))
    }

    fn reaped(&mut self, status: ExitStatus) -> ExitStatus {
        info!(pid = self.child.id(), %status, "traced program exited");
        self.status = Some(status);
        status
    }
}

impl Drop for Tracee {
    fn drop(&mut self) {
        if self.status.is_none() {
            if let Err(err) = self.kill() {
                warn!(pid = self.child.id(), %err, "unable to reap traced program");
            }
        }
    }
}
