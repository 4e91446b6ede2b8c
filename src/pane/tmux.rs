//! tmux pane backend.
//!
//! Shells out to the `tmux` client for every operation. Pane identity is
//! tmux's global pane id (`%N`), which stays valid across sessions and
//! windows for the lifetime of the tmux server.

use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::{debug, info_span, Instrument};

use crate::pane::backend::{BackendFuture, PaneBackend, SplitRequest};
use crate::pane::{PaneInfo, SplitDirection};
use crate::{AppError, Result};

/// Format used to describe panes; fields are tab separated and the start
/// command comes last because it may itself contain tabs.
const PANE_FORMAT: &str =
    "#{pane_id}\t#{pane_dead}\t#{@canvas_scope}\t#{pane_current_command}\t#{pane_start_command}";

/// tmux-backed [`PaneBackend`].
#[derive(Debug, Clone)]
pub struct TmuxBackend {
    bin: String,
}

impl TmuxBackend {
    /// Use the tmux client at `bin` (usually just `tmux`).
    #[must_use]
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, "tmux");
        Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| AppError::Pane(format!("failed to run {}: {err}", self.bin)))
    }

    /// Run a command that must succeed and return its trimmed stdout.
    async fn run_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
        } else {
            Err(AppError::Pane(format!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl PaneBackend for TmuxBackend {
    fn describe<'a>(&'a self, pane_id: &'a str) -> BackendFuture<'a, Option<PaneInfo>> {
        Box::pin(
            async move {
                let output = self
                    .run(&["display-message", "-p", "-t", pane_id, PANE_FORMAT])
                    .await?;
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    if is_absent(&stderr) {
                        return Ok(None);
                    }
                    return Err(AppError::Pane(format!(
                        "tmux display-message failed: {}",
                        stderr.trim()
                    )));
                }

                let stdout = String::from_utf8_lossy(&output.stdout);
                Ok(stdout.lines().find_map(parse_pane_line))
            }
            .instrument(info_span!("tmux_describe", pane_id)),
        )
    }

    fn list_panes(&self) -> BackendFuture<'_, Vec<PaneInfo>> {
        Box::pin(async move {
            let output = self.run(&["list-panes", "-a", "-F", PANE_FORMAT]).await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if is_absent(&stderr) {
                    return Ok(Vec::new());
                }
                return Err(AppError::Pane(format!(
                    "tmux list-panes failed: {}",
                    stderr.trim()
                )));
            }

            Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(parse_pane_line)
                .collect())
        })
    }

    fn split<'a>(&'a self, request: &'a SplitRequest) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let size = format!("{}%", request.size_percent);
            let orientation = match request.direction {
                SplitDirection::Horizontal => "-h",
                SplitDirection::Vertical => "-v",
            };

            let mut args = vec![
                "split-window",
                orientation,
                "-l",
                size.as_str(),
                "-P",
                "-F",
                "#{pane_id}",
            ];
            if let Some(target) = request.target.as_deref() {
                args.extend(["-t", target]);
            }
            args.push(request.command.as_str());

            let pane_id = self.run_ok(&args).await?;
            if pane_id.is_empty() {
                return Err(AppError::Pane("tmux split-window printed no pane id".into()));
            }
            Ok(pane_id)
        })
    }

    fn set_option<'a>(
        &'a self,
        pane_id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(&["set-option", "-p", "-t", pane_id, key, value])
                .await
                .map(drop)
        })
    }

    fn respawn<'a>(&'a self, pane_id: &'a str, command: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(&["respawn-pane", "-k", "-t", pane_id, command])
                .await
                .map(drop)
        })
    }

    fn interrupt<'a>(&'a self, pane_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(&["send-keys", "-t", pane_id, "C-c"])
                .await
                .map(drop)
        })
    }

    fn kill<'a>(&'a self, pane_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move { self.run_ok(&["kill-pane", "-t", pane_id]).await.map(drop) })
    }
}

/// tmux reports a missing pane or server rather than an empty result.
fn is_absent(stderr: &str) -> bool {
    stderr.contains("can't find")
        || stderr.contains("no server running")
        || stderr.contains("error connecting")
}

/// Parse one [`PANE_FORMAT`] line.
fn parse_pane_line(line: &str) -> Option<PaneInfo> {
    let mut fields = line.splitn(5, '\t');
    let id = fields.next()?.trim();
    if id.is_empty() {
        return None;
    }
    let dead = fields.next()? == "1";
    let tag = fields.next().unwrap_or_default();
    let current_command = fields.next().unwrap_or_default();
    let start_command = fields.next().unwrap_or_default();

    Some(PaneInfo {
        id: id.to_owned(),
        dead,
        scope_tag: (!tag.is_empty()).then(|| tag.to_owned()),
        start_command: start_command.to_owned(),
        current_command: current_command.to_owned(),
    })
}
