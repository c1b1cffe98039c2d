//! Spawning the renderer process.

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use std::process::Stdio;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

/// A freshly spawned renderer with its three pipes detached from the handle.
pub(crate) struct SpawnedRenderer {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Build the command for `config` without spawning it.
pub(crate) fn build_command(config: &WorkerConfig) -> Command {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args);

    if let Some(ref dir) = config.working_dir {
        cmd.current_dir(dir);
    }

    // The host environment is inherited; overlay entries replace inherited ones.
    cmd.envs(&config.env);

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd
}

/// Spawn the renderer described by `config`.
pub(crate) fn spawn(config: &WorkerConfig) -> Result<SpawnedRenderer> {
    debug!(
        "Spawning renderer {} {:?} (overlay keys: {:?})",
        config.program.display(),
        config.args,
        config.env.keys().collect::<Vec<_>>()
    );

    let mut child = build_command(config)
        .spawn()
        .map_err(|source| WorkerError::Spawn {
            program: config.program.clone(),
            source,
        })?;

    let missing = |pipe: &str| WorkerError::Spawn {
        program: config.program.clone(),
        source: std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("renderer {} was not captured", pipe),
        ),
    };

    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    info!(
        "Spawned renderer {} (PID {:?})",
        config.program.display(),
        child.id()
    );

    Ok(SpawnedRenderer {
        child,
        stdin,
        stdout,
        stderr,
    })
}
