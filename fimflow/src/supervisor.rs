//! Process supervisor: one isolated child process per running job.
//!
//! Jobs run out-of-process because solver invocations can hang or leak
//! resources the parent cannot reclaim, and dismissal must be observable at
//! OS granularity. The supervisor spawns the service binary back on itself
//! (`run-stage <process>`), feeds the input document on stdin, streams both
//! pipes into the job store, and maps the child's exit into the job's
//! result or error document.
//!
//! Cancellation: the store publishes dismissed job ids; the supervisor
//! sends the terminate signal, waits out a grace window, then kills.

use crate::config::Settings;
use crate::job::{JobId, JobRecord, LogStream};
use crate::store::JobStore;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Exit code recorded for dismissed jobs.
pub const DISMISSED_EXIT_CODE: i32 = -1;

#[derive(Clone)]
pub struct Supervisor {
    store: JobStore,
    settings: Settings,
    dismiss_grace: Duration,
    log_byte_cap: usize,
    children: Arc<DashMap<JobId, CancellationToken>>,
}

impl Supervisor {
    pub fn new(store: JobStore, settings: &Settings) -> Self {
        Self {
            store,
            settings: settings.clone(),
            dismiss_grace: settings.dismiss_grace,
            log_byte_cap: settings.log_byte_cap,
            children: Arc::new(DashMap::new()),
        }
    }

    /// Starts the background task that turns store dismissals into child
    /// cancellations.
    pub fn spawn_dismissal_listener(&self) {
        let children = Arc::clone(&self.children);
        let mut rx = self.store.subscribe_cancellations();
        tokio::spawn(async move {
            while let Ok(job_id) = rx.recv().await {
                if let Some(entry) = children.get(&job_id) {
                    debug!(job_id = %job_id, "cancelling child process");
                    entry.value().cancel();
                }
            }
        });
    }

    /// Count of live children.
    pub fn active_children(&self) -> usize {
        self.children.len()
    }

    /// Runs one claimed job to completion.
    pub async fn supervise(&self, job: JobRecord) {
        let job_id = job.job_id.clone();
        info!(job_id = %job_id, process = %job.process, "starting job");

        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                self.fail_internal(&job_id, format!("cannot locate service binary: {e}"));
                return;
            }
        };
        // The child re-reads configuration from the environment; flag
        // overrides given to `service start` are forwarded explicitly.
        let mut command = Command::new(&exe);
        command
            .arg("run-stage")
            .arg(&job.process)
            .env("FIMFLOW_DATA_DIR", &self.settings.data_dir)
            .env(
                "FIMFLOW_NORMAL_DEPTH_SLOPE",
                self.settings.normal_depth_slope.to_string(),
            );
        if let Some(network_path) = &self.settings.network_path {
            command.env("FIMFLOW_NETWORK_PATH", network_path);
        }
        if let Some(dem_source) = &self.settings.dem_source {
            command.env("FIMFLOW_DEM_URL", dem_source);
        }
        if let Some(solver) = &self.settings.solver_command {
            command.env("FIMFLOW_SOLVER_COMMAND", solver);
        }
        let mut child = match command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.fail_internal(&job_id, format!("failed to spawn child: {e}"));
                return;
            }
        };

        let pid = child.id().unwrap_or_default();
        if let Err(e) = self.store.mark_started(&job_id, pid) {
            // The job was dismissed between claim and spawn; reap the child.
            warn!(job_id = %job_id, "job no longer running at start: {e}");
            let _ = child.kill().await;
            return;
        }

        if let Some(mut stdin) = child.stdin.take() {
            let payload = job.input.to_string();
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                warn!(job_id = %job_id, "failed writing input to child: {e}");
            }
            drop(stdin);
        }

        let token = CancellationToken::new();
        self.children.insert(job_id.clone(), token.clone());

        let stdout_task = self.capture(job_id.clone(), LogStream::Stdout, child.stdout.take());
        let stderr_task = self.capture(job_id.clone(), LogStream::Stderr, child.stderr.take());

        // Signalling goes through the pid rather than the child handle so
        // the wait future keeps the only mutable borrow.
        let mut dismissed = false;
        let mut kill_at: Option<tokio::time::Instant> = None;
        let wait = child.wait();
        tokio::pin!(wait);
        let exit_code = loop {
            tokio::select! {
                status = &mut wait => break match status {
                    Ok(status) => status.code().unwrap_or(DISMISSED_EXIT_CODE),
                    Err(e) => {
                        error!(job_id = %job_id, "waiting on child failed: {e}");
                        DISMISSED_EXIT_CODE
                    }
                },
                _ = token.cancelled(), if !dismissed => {
                    dismissed = true;
                    terminate(pid);
                    kill_at = Some(tokio::time::Instant::now() + self.dismiss_grace);
                }
                _ = sleep_until_opt(kill_at), if kill_at.is_some() => {
                    warn!(job_id = %job_id, "grace window elapsed, killing child");
                    kill(pid);
                    kill_at = None;
                }
            }
        };

        let last_stdout = stdout_task.await.unwrap_or_default();
        let last_stderr = stderr_task.await.unwrap_or_default();
        self.children.remove(&job_id);

        if dismissed {
            let error = json!({"type": "Dismissed", "detail": "job dismissed by request"});
            if let Err(e) = self
                .store
                .record_dismissal_exit(&job_id, DISMISSED_EXIT_CODE, &error)
            {
                error!(job_id = %job_id, "recording dismissal exit failed: {e}");
            }
            info!(job_id = %job_id, "job dismissed");
            return;
        }

        let (result, error) = interpret_exit(exit_code, &last_stdout, &last_stderr);
        if let Err(e) = self
            .store
            .complete(&job_id, exit_code, result.as_ref(), error.as_ref())
        {
            error!(job_id = %job_id, "completing job failed: {e}");
        }
        info!(job_id = %job_id, exit_code, "job finished");
    }

    /// Streams one pipe into the job store, line by line, and returns the
    /// final line. Appends stop at the byte cap; draining continues so the
    /// child never blocks on a full pipe.
    fn capture(
        &self,
        job_id: JobId,
        stream: LogStream,
        pipe: Option<impl AsyncRead + Unpin + Send + 'static>,
    ) -> tokio::task::JoinHandle<String> {
        let store = self.store.clone();
        let byte_cap = self.log_byte_cap;
        tokio::spawn(async move {
            let Some(pipe) = pipe else {
                return String::new();
            };
            let mut lines = BufReader::new(pipe).lines();
            let mut last_line = String::new();
            let mut appended = 0usize;
            let mut capped = false;
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    last_line = line.clone();
                }
                if appended + line.len() <= byte_cap {
                    appended += line.len();
                    if let Err(e) = store.append_log(&job_id, stream, &line) {
                        warn!(job_id = %job_id, "log append failed: {e}");
                    }
                } else if !capped {
                    capped = true;
                    let _ = store.append_log(
                        &job_id,
                        stream,
                        "[log capture cap reached; further output not recorded]",
                    );
                }
            }
            last_line
        })
    }

    fn fail_internal(&self, job_id: &JobId, detail: String) {
        error!(job_id = %job_id, "{detail}");
        let error = json!({"type": "Internal", "detail": detail});
        let _ = self.store.complete(job_id, DISMISSED_EXIT_CODE, None, Some(&error));
    }
}

/// Sends the platform terminate signal.
fn terminate(pid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Sends the platform kill signal.
fn kill(pid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Sleeps until the deadline; pending forever when `None` (the branch is
/// guarded, so this future is only polled with a deadline set).
async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Maps a child exit into result/error documents.
///
/// Exit zero parses the final stdout line as the result; non-zero parses
/// the final stderr line as the error. Parse failures synthesize an
/// `Internal` error carrying the raw line.
fn interpret_exit(
    exit_code: i32,
    last_stdout: &str,
    last_stderr: &str,
) -> (Option<Value>, Option<Value>) {
    if exit_code == 0 {
        match serde_json::from_str::<Value>(last_stdout) {
            Ok(result) => (Some(result), None),
            Err(_) => (
                None,
                Some(json!({
                    "type": "Internal",
                    "detail": "child exited cleanly without a parseable result document",
                    "traceback": last_stdout,
                })),
            ),
        }
    } else {
        let error = serde_json::from_str::<Value>(last_stderr).unwrap_or_else(|_| {
            json!({
                "type": "Internal",
                "detail": format!("child exited with code {exit_code}"),
                "traceback": last_stderr,
            })
        });
        (None, Some(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_clean_exit() {
        let (result, error) = interpret_exit(0, r#"{"ok": true}"#, "");
        assert_eq!(result.unwrap()["ok"], true);
        assert!(error.is_none());
    }

    #[test]
    fn test_interpret_clean_exit_without_result() {
        let (result, error) = interpret_exit(0, "plain text", "");
        assert!(result.is_none());
        assert_eq!(error.unwrap()["type"], "Internal");
    }

    #[test]
    fn test_interpret_failure_with_document() {
        let (result, error) = interpret_exit(1, "", r#"{"type": "SolverCrash", "detail": "x"}"#);
        assert!(result.is_none());
        assert_eq!(error.unwrap()["type"], "SolverCrash");
    }

    #[test]
    fn test_interpret_failure_without_document() {
        let (_, error) = interpret_exit(3, "", "panic: boom");
        let error = error.unwrap();
        assert_eq!(error["type"], "Internal");
        assert_eq!(error["traceback"], "panic: boom");
    }
}
