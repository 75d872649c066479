use std::path::Path;
use std::process::Stdio;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use crate::error::ToolError;

/// Keep error messages readable when a tool dumps pages of diagnostics
const STDERR_TAIL_BYTES: usize = 2000;

/// Captured output of a finished tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run an external tool to completion.
///
/// Exit code 0 is success; `extra_ok_codes` lists other codes that still
/// produce usable output (qpdf exits 3 on warnings). With `timeout_secs` set,
/// a child that runs too long is killed and reported as a timeout; `Some(0)`
/// means no timeout, same as `None`.
pub async fn run_tool(
    bin: &Path,
    args: &[String],
    timeout_secs: Option<u64>,
    extra_ok_codes: &[i32],
) -> Result<ToolOutput, ToolError> {
    let tool = bin.display().to_string();
    debug!("Executing: {} {}", tool, args.join(" "));

    let mut cmd = Command::new(bin);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
        tool: tool.clone(),
        source,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Drain both pipes while the child runs so it never blocks on a full pipe
    let stdout_handle = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stdout) = stdout {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                lines.push(line);
            }
        }
        lines.join("\n")
    });
    let stderr_handle = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stderr) = stderr {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                lines.push(line);
            }
        }
        lines.join("\n")
    });

    let status = match timeout_secs.filter(|secs| *secs > 0) {
        Some(secs) => match timeout(Duration::from_secs(secs), child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ToolError::Timeout { tool, secs });
            }
        },
        None => child.wait().await?,
    };

    let stdout = stdout_handle.await.unwrap_or_default();
    let stderr = stderr_handle.await.unwrap_or_default();
    let exit_code = status.code();

    let ok = status.success() || exit_code.map_or(false, |c| extra_ok_codes.contains(&c));
    if !ok {
        return Err(ToolError::Exit {
            tool,
            code: exit_code,
            stderr: tail(&stderr, STDERR_TAIL_BYTES).to_string(),
        });
    }

    debug!("{} finished (exit code {:?})", tool, exit_code);
    Ok(ToolOutput {
        exit_code,
        stdout,
        stderr,
    })
}

/// Last `max` bytes of `s`, cut on a char boundary
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
