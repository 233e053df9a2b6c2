//! Stdin controller for a running test
//!
//! Accepted lines:
//!
//! - `users <n> [ramp]` move the population to `n`, optionally over `ramp`
//! - `status` print the current population and counters
//! - `stop` stop gracefully
//! - `kill` stop immediately

use std::io::BufRead;
use std::time::Duration;

use anyhow::{Context, Result};
use swarm_bench_core::{SchedulerHandle, StopMode};
use tokio::sync::mpsc;

use super::parse_duration;
use super::progress::status_line;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ControlCommand {
    Users { count: usize, over: Duration },
    Status,
    Stop(StopMode),
}

/// Parse one input line; blank lines yield `None`
pub(crate) fn parse_command(line: &str) -> Result<Option<ControlCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb {
        "users" | "u" => {
            let count = words
                .next()
                .ok_or("usage: users <n> [ramp]")?
                .parse()
                .map_err(|_| "user count must be a non-negative integer".to_string())?;
            let over = match words.next() {
                Some(ramp) => parse_duration(ramp)?,
                None => Duration::ZERO,
            };
            ControlCommand::Users { count, over }
        }
        "status" | "s" => ControlCommand::Status,
        "stop" => ControlCommand::Stop(StopMode::Graceful),
        "kill" => ControlCommand::Stop(StopMode::Immediate),
        other => return Err(format!("unknown command '{}'", other)),
    };

    if let Some(extra) = words.next() {
        return Err(format!("unexpected argument '{}'", extra));
    }
    Ok(Some(command))
}

/// Forward stdin lines from a dedicated thread
///
/// A blocking read cannot be cancelled, so it stays off the runtime: the
/// thread is left parked in `read` when the run ends and goes away with the
/// process. It exits on EOF, on a read error, or once the receiver is dropped.
pub fn stdin_lines() -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin-control".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// Apply commands from `lines` until the sender closes or the run ends
pub async fn control(handle: SchedulerHandle, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let sent = match command {
            ControlCommand::Users { count, over } => {
                tracing::info!(users = count, over = ?over, "Ramping");
                handle.ramp_to(count, over)
            }
            ControlCommand::Status => {
                eprintln!("{}", status_line(&handle.snapshot()));
                Ok(())
            }
            ControlCommand::Stop(mode) => {
                tracing::info!(mode = ?mode, "Stop requested");
                handle.stop(mode)
            }
        };
        if sent.is_err() {
            break;
        }
    }
}
