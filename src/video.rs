use std::io::{BufRead, BufReader};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::playback::PlaybackSource;

const POLL_INTERVAL: Duration = Duration::from_millis(30);

pub struct LaunchOptions<'a> {
    /// Program followed by its arguments. `%URL%`, `%MIME%` and `%TITLE%`
    /// are replaced in every argument.
    pub command: &'a [String],
    pub source: &'a PlaybackSource,
    pub title: &'a str,
}

/// Expands the command template for one source.
pub fn build_args(template: &[String], source: &PlaybackSource, title: &str) -> Vec<String> {
    let mut saw_url = false;
    let mut args: Vec<String> = template
        .iter()
        .map(|arg| {
            saw_url |= arg.contains("%URL%");
            arg.replace("%URL%", &source.uri)
                .replace("%MIME%", &source.declared_mime)
                .replace("%TITLE%", title)
        })
        .collect();
    if !saw_url && !args.is_empty() {
        args.push(source.uri.clone());
    }
    args
}

/// A running player process watched by a supervising thread.
pub struct PlayerSession {
    kill_tx: Sender<()>,
    status_rx: Receiver<Result<ExitStatus>>,
    handle: Option<thread::JoinHandle<()>>,
    title: String,
}

impl PlayerSession {
    fn finalize(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn try_status(&mut self) -> Option<Result<ExitStatus>> {
        match self.status_rx.try_recv() {
            Ok(res) => {
                self.finalize();
                Some(res)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finalize();
                Some(Err(anyhow!("player session closed unexpectedly")))
            }
        }
    }

    pub fn stop_blocking(mut self) -> Option<Result<ExitStatus>> {
        let _ = self.kill_tx.send(());
        let res = self.status_rx.recv().ok();
        self.finalize();
        res
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.kill_tx.send(());
            let _ = self.status_rx.recv().ok();
            self.finalize();
        }
    }
}

pub fn spawn_player(opts: LaunchOptions<'_>) -> Result<PlayerSession> {
    if opts.source.uri.trim().is_empty() {
        bail!("video URL missing");
    }
    let args = build_args(opts.command, opts.source, opts.title);
    let Some((program, rest)) = args.split_first() else {
        bail!("player command is empty");
    };

    let capture_stderr = tracing::enabled!(tracing::Level::DEBUG);
    let mut command = Command::new(program);
    command.args(rest);
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(if capture_stderr {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    tracing::info!(
        program = %program,
        uri = %opts.source.uri,
        transcoded = opts.source.is_transcoded,
        "launching player"
    );
    let mut child = command
        .spawn()
        .with_context(|| format!("launch {program} for {}", opts.source.uri))?;

    let mut stderr_handle = child.stderr.take().map(|stderr| {
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                tracing::debug!(target: "flix_tui::player", "{line}");
            }
        })
    });

    let (kill_tx, kill_rx) = bounded::<()>(1);
    let (status_tx, status_rx) = bounded::<Result<ExitStatus>>(1);

    let handle = thread::spawn(move || {
        let result = (|| -> Result<ExitStatus> {
            loop {
                if kill_rx.try_recv().is_ok() {
                    let _ = child.kill();
                    return child.wait().context("wait for player after stop request");
                }
                match child.try_wait() {
                    Ok(Some(status)) => return Ok(status),
                    Ok(None) => thread::sleep(POLL_INTERVAL),
                    Err(err) => return Err(anyhow!(err)).context("poll player status"),
                }
            }
        })();
        if let Some(handle) = stderr_handle.take() {
            let _ = handle.join();
        }
        match &result {
            Ok(status) => tracing::debug!(code = ?status.code(), "player exited"),
            Err(err) => tracing::warn!("player supervision failed: {err:#}"),
        }
        let _ = status_tx.send(result);
    });

    Ok(PlayerSession {
        kill_tx,
        status_rx,
        handle: Some(handle),
        title: opts.title.to_string(),
    })
}
