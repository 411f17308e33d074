//
// command.rs
// T1wPreprocessing-rs
//
// Runs external neuroimaging tools synchronously and captures their output for parsing and diagnosis.
//
// Thales Matheus Mendonça Santos - November 2025

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, error, info};

use crate::error::PipelineError;

/// Image-processing toolkit (Convert3D).
pub const C3D: &str = "c3d";
/// Brain extraction model.
pub const HD_BET: &str = "hd-bet";
pub const TRIM_NECK: &str = "trim_neck.sh";

/// Argument vector for one external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    // Kept as OS strings so non-UTF-8 paths reach the tool unchanged.
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    pub fn path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Value following `flag`, e.g. the output path after `-o`. `None` if it is not UTF-8.
    pub fn value_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .and_then(|value| value.to_str())
    }

    /// Every UTF-8 value following `flag`, in order.
    pub fn values_after(&self, flag: &str) -> Vec<&str> {
        self.args
            .windows(2)
            .filter(|pair| pair[0] == flag)
            .filter_map(|pair| pair[1].to_str())
            .collect()
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

/// Seam between pipeline stages and the processes they launch.
pub trait CommandRunner {
    fn run(&self, command: &ToolCommand) -> Result<CommandOutput, PipelineError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &ToolCommand) -> Result<CommandOutput, PipelineError> {
        (**self).run(command)
    }
}

// exit code, success flag, stdout, stderr
type RawOutcome = (Option<i32>, bool, String, String);

/// Launches real processes. Verbosity travels with the runner value.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner {
    verbose: bool,
}

impl SystemRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    fn spawn_error(command: &ToolCommand, source: std::io::Error) -> PipelineError {
        PipelineError::Spawn {
            command: command.to_string(),
            source,
        }
    }

    fn run_captured(&self, command: &ToolCommand) -> Result<RawOutcome, PipelineError> {
        let output = Command::new(command.program())
            .args(command.arguments())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Self::spawn_error(command, e))?;

        Ok((
            output.status.code(),
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    fn run_streaming(&self, command: &ToolCommand) -> Result<RawOutcome, PipelineError> {
        let mut child = Command::new(command.program())
            .args(command.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(command, e))?;

        // Drain stderr on a helper thread so neither pipe can fill up and block the child.
        let stderr_reader = child.stderr.take().map(|stderr| {
            let program = command.program().to_string();
            thread::spawn(move || echo_lines(stderr, &program, "stderr"))
        });

        let stdout = match child.stdout.take() {
            Some(stdout) => echo_lines(stdout, command.program(), "stdout"),
            None => String::new(),
        };
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        let status = child.wait().map_err(|e| Self::spawn_error(command, e))?;
        Ok((status.code(), status.success(), stdout, stderr))
    }
}

fn echo_lines(stream: impl Read, program: &str, channel: &str) -> String {
    let mut captured = String::new();
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { break };
        info!(tool = program, stream = channel, "{}", line);
        captured.push_str(&line);
        captured.push('\n');
    }
    captured
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ToolCommand) -> Result<CommandOutput, PipelineError> {
        let command_str = command.to_string();
        if self.verbose {
            info!("--- Running {} ---", command.program());
            info!("{}", command_str);
        } else {
            debug!("Running {}", command_str);
        }

        let (code, success, stdout, stderr) = if self.verbose {
            self.run_streaming(command)?
        } else {
            self.run_captured(command)?
        };

        if self.verbose {
            info!("--- end {} ---", command.program());
        }

        if !success {
            error!("Error running command: {}", command_str);
            // Streams were already echoed in verbose mode.
            if !self.verbose {
                error!("command stdout:\n{}", stdout);
                error!("command stderr:\n{}", stderr);
            }
            return Err(PipelineError::CommandFailed {
                command: command_str,
                status: code,
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput {
            command: command_str,
            stdout,
            stderr,
        })
    }
}
