//! `stagehand daemon`: background auto-deploy lifecycle.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use stagehand_daemon::paths::{logs_dir, socket_path, stderr_log_path, stdout_log_path};
use stagehand_daemon::{request_status, request_stop, start_blocking, DaemonError};

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon (watcher + deploy queue + socket server).
    Start(DaemonStartArgs),
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Print recent daemon log lines.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct DaemonStartArgs {
    /// Detach, writing output to the daemon log files.
    #[arg(long)]
    pub background: bool,
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only the stderr log file.
    #[arg(long)]
    pub stderr_only: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start(args) if args.background => spawn_background(&home)?,
        DaemonCommand::Start(_) => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let payload = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to render daemon status JSON")?
            );
        }
        DaemonCommand::Logs(args) => {
            if !args.stderr_only {
                print_tail(&stdout_log_path(&home), args.lines)
                    .context("failed to read daemon stdout log")?;
            }
            print_tail(&stderr_log_path(&home), args.lines)
                .context("failed to read daemon stderr log")?;
        }
    }

    Ok(())
}

/// Re-run this binary as `daemon start` with output going to the log files,
/// then wait for its socket to answer.
fn spawn_background(home: &Path) -> Result<()> {
    let logs = logs_dir(home);
    fs::create_dir_all(&logs).with_context(|| format!("create {}", logs.display()))?;
    let append = |path: &Path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open {}", path.display()))
    };

    let exe = std::env::current_exe().context("cannot locate the stagehand binary")?;
    let child = Command::new(exe)
        .args(["daemon", "start"])
        .stdin(Stdio::null())
        .stdout(append(&stdout_log_path(home))?)
        .stderr(append(&stderr_log_path(home))?)
        .spawn()
        .context("failed to spawn daemon")?;

    // request_status retries for half a second; allow a few rounds of that.
    let mut status = request_status(home);
    for _ in 0..5 {
        if !matches!(status, Err(DaemonError::DaemonNotRunning { .. })) {
            break;
        }
        status = request_status(home);
    }
    status.context("daemon did not come up; see `stagehand daemon logs`")?;
    println!("daemon started (pid {})", child.id());
    println!("  socket: {}", socket_path(home).display());
    Ok(())
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
