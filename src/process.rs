//! External tool invocation with progress parsing and cancellation.
//!
//! curl-impersonate, git and 7z all print percentage tokens on stderr while
//! they work (`45%`, `45.2%`). We read stderr as it arrives, forward the most
//! recent percentage, and keep a short tail for error messages.

use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bytes of stderr kept for error reporting.
const STDERR_TAIL_LIMIT: usize = 8 * 1024;

/// Failure of an external tool run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

fn percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").expect("valid percent regex"))
}

/// Last percentage token in a chunk of tool output, if any.
pub fn last_percent(text: &str) -> Option<f64> {
    percent_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .filter(|p| *p <= 100.0)
        .last()
}

/// Last meaningful stderr line, skipping bare progress output.
pub fn summarize_stderr(stderr: &str) -> String {
    stderr
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| last_percent(l).is_none() || l.len() > 40)
        .last()
        .unwrap_or("unknown error")
        .to_string()
}

fn push_tail(tail: &mut String, chunk: &str) {
    tail.push_str(chunk);
    if tail.len() > STDERR_TAIL_LIMIT {
        let mut cut = tail.len() - STDERR_TAIL_LIMIT / 2;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}

/// Run `cmd` to completion, forwarding stderr percentages to `on_percent`.
///
/// The child is killed if `cancel` fires. Non-zero exit becomes
/// `RunError::Failed` carrying the last stderr line.
pub async fn run_with_progress(
    mut cmd: Command,
    what: &str,
    on_percent: &(dyn Fn(f64) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<(), RunError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| RunError::Failed(format!("Failed to run {}: {}", what, e)))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunError::Failed(format!("{}: stderr not captured", what)))?;

    let mut tail = String::new();
    let run = async {
        let mut buf = [0u8; 4096];
        loop {
            let n = stderr.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let chunk = String::from_utf8_lossy(&buf[..n]);
            if let Some(percent) = last_percent(&chunk) {
                on_percent(percent);
            }
            push_tail(&mut tail, &chunk);
        }
        child.wait().await
    };

    let finished = tokio::select! {
        _ = cancel.cancelled() => None,
        status = run => Some(status),
    };

    let status = match finished {
        None => {
            debug!("Cancelling {}", what);
            let _ = child.kill().await;
            return Err(RunError::Cancelled);
        }
        Some(status) => status.map_err(|e| RunError::Failed(format!("{}: {}", what, e)))?,
    };

    if !status.success() {
        return Err(RunError::Failed(format!(
            "{} exited with {}: {}",
            what,
            status,
            summarize_stderr(&tail)
        )));
    }

    Ok(())
}

/// Run `cmd` and capture stdout as text, killing the child on cancellation.
pub async fn capture_stdout(
    mut cmd: Command,
    what: &str,
    cancel: &CancellationToken,
) -> Result<String, RunError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::select! {
        _ = cancel.cancelled() => return Err(RunError::Cancelled),
        output = cmd.output() => {
            output.map_err(|e| RunError::Failed(format!("Failed to run {}: {}", what, e)))?
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RunError::Failed(format!(
            "{} exited with {}: {}",
            what,
            output.status,
            summarize_stderr(&stderr)
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
