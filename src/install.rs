// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Install missing tools.
//!
//! A fresh machine usually needs a handful of programs before its dotfiles
//! make sense, e.g., a prompt, a better `ls`, a fuzzy finder. Instead of
//! scattering "install if missing" checks across scripts, the manifest lists
//! each program as a [`Tool`] record with a check command and an install
//! command. Every record is processed the same way: run the check, and if it
//! fails, run the install. How the install happens (package manager, script,
//! download) is opaque to dotlink.

use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    process::{Command, ExitStatus, Stdio},
};
use tracing::{debug, info, instrument, warn};

/// Program to install when missing.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Tool {
    /// Display name of tool.
    pub name: String,

    /// Command that succeeds when tool is present.
    pub check: Vec<String>,

    /// Command that installs tool.
    pub install: Vec<String>,
}

/// What happened to a single tool.
#[derive(Debug)]
pub enum ToolStatus {
    /// Check passed, nothing installed.
    Present,

    /// Check failed, install succeeded.
    Installed,

    /// Install could not be completed.
    Failed(InstallError),
}

impl ToolStatus {
    /// Check if tool ended up failing.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl Display for ToolStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Present => fmt.write_str("present"),
            Self::Installed => fmt.write_str("installed"),
            Self::Failed(error) => write!(fmt, "failed: {error}"),
        }
    }
}

/// Run external commands.
pub trait Runner {
    /// Run command quietly, and report whether it succeeded.
    ///
    /// A command that cannot even be spawned counts as failure.
    fn probe(&self, program: &str, args: &[String]) -> bool;

    /// Run command attached to current terminal.
    fn run_interactive(&self, program: &str, args: &[String]) -> Result<()>;
}

/// Run commands as child processes of current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn probe(&self, program: &str, args: &[String]) -> bool {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn run_interactive(&self, program: &str, args: &[String]) -> Result<()> {
        let status = syscall_interactive(program, args).map_err(|source| InstallError::Spawn {
            source,
            program: program.to_string(),
        })?;

        if !status.success() {
            return Err(InstallError::Failed {
                program: program.to_string(),
                status,
            });
        }

        Ok(())
    }
}

fn syscall_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> std::io::Result<ExitStatus> {
    Command::new(cmd.as_ref()).args(args).spawn()?.wait()
}

/// Install every tool whose check fails.
///
/// Never aborts early; every tool gets a status in manifest order.
#[instrument(skip(tools, runner), level = "debug")]
pub fn ensure_tools(tools: &[Tool], runner: &impl Runner) -> Vec<(String, ToolStatus)> {
    tools
        .iter()
        .map(|tool| {
            let status = ensure_tool(tool, runner);
            match &status {
                ToolStatus::Failed(error) => warn!("{}: {error}", tool.name),
                status => info!("{}: {status}", tool.name),
            }
            (tool.name.clone(), status)
        })
        .collect()
}

fn ensure_tool(tool: &Tool, runner: &impl Runner) -> ToolStatus {
    let Some((check, check_args)) = tool.check.split_first() else {
        return ToolStatus::Failed(InstallError::EmptyCommand {
            name: tool.name.clone(),
        });
    };

    if runner.probe(check, check_args) {
        debug!("{} already present", tool.name);
        return ToolStatus::Present;
    }

    let Some((install, install_args)) = tool.install.split_first() else {
        return ToolStatus::Failed(InstallError::EmptyCommand {
            name: tool.name.clone(),
        });
    };

    info!("installing {}", tool.name);
    match runner.run_interactive(install, install_args) {
        Ok(()) => ToolStatus::Installed,
        Err(error) => ToolStatus::Failed(error),
    }
}

/// Tool installation error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Tool record is missing a command.
    #[error("tool {name:?} has an empty check or install command")]
    EmptyCommand { name: String },

    /// Command could not be started.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Command ran, but did not succeed.
    #[error("{program:?} exited with {status}")]
    Failed { program: String, status: ExitStatus },
}

/// Friendly result alias :3
pub type Result<T, E = InstallError> = std::result::Result<T, E>;
