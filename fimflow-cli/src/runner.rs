//! Command implementations.

use crate::error::CliError;
use fimflow::config::Settings;
use fimflow::pipeline::{run_process, StageContext};
use fimflow::service::{Service, ServiceError};
use std::io::Read;
use std::path::PathBuf;
use tracing::error;

/// `service start`: run the service in the foreground.
pub fn run_start(
    port: Option<u16>,
    threads: Option<usize>,
    data_dir: Option<PathBuf>,
) -> Result<(), CliError> {
    let mut settings = Settings::load();
    if let Some(port) = port {
        settings.port = port;
    }
    if let Some(threads) = threads {
        settings.workers = threads;
    }
    if let Some(data_dir) = data_dir {
        settings.data_dir = data_dir;
    }

    let _guard = fimflow::logging::init_logging(&settings.log_dir())
        .map_err(|e| CliError::Config(format!("cannot initialize logging: {e}")))?;

    println!("fimflow v{}", fimflow::VERSION);
    println!("Listening on {}", settings.listen_address());
    println!("Workers: {}", settings.workers);
    println!("Data directory: {}", settings.data_dir.display());
    println!();
    println!("Press Ctrl+C to stop");

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::Runtime(format!("cannot start runtime: {e}")))?;
    runtime.block_on(async {
        let service =
            Service::new(settings).map_err(|e| CliError::Config(e.to_string()))?;
        service.run().await.map_err(|e| match e {
            ServiceError::Bind { .. } => CliError::Bind(e.to_string()),
            other => CliError::Runtime(other.to_string()),
        })
    })
}

/// `service status`: ping a running service.
pub fn run_status(port: Option<u16>) -> Result<(), CliError> {
    let settings = Settings::load();
    let port = port.unwrap_or(settings.port);
    let url = format!("http://127.0.0.1:{port}/ping");
    let response = reqwest::blocking::get(&url)
        .map_err(|e| CliError::Runtime(format!("service unreachable at {url}: {e}")))?;
    let status = response.status();
    let body = response
        .text()
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    println!("{body}");
    if !status.is_success() {
        return Err(CliError::Runtime(format!("service returned {status}")));
    }
    Ok(())
}

/// `service stop`: signal the pid recorded at startup.
pub fn run_stop() -> Result<(), CliError> {
    let settings = Settings::load();
    let pid_path = settings.pid_path();
    let text = std::fs::read_to_string(&pid_path).map_err(|e| {
        CliError::Config(format!(
            "no running service found ({}: {e})",
            pid_path.display()
        ))
    })?;
    let pid: i32 = text
        .trim()
        .parse()
        .map_err(|_| CliError::Config(format!("malformed pid file {}", pid_path.display())))?;
    #[cfg(unix)]
    unsafe {
        if libc::kill(pid, libc::SIGTERM) != 0 {
            return Err(CliError::Runtime(format!("cannot signal pid {pid}")));
        }
    }
    println!("Sent shutdown signal to pid {pid}");
    Ok(())
}

/// `run-stage`: the child-process entrypoint.
///
/// Reads the input document from stdin, runs the stage, prints the result
/// document as the final stdout line and exits 0. On failure prints the
/// error document as the final stderr line and exits 1.
pub fn run_stage(process: &str) -> Result<(), CliError> {
    fimflow::logging::init_child_logging();

    let mut raw = String::new();
    if std::io::stdin().read_to_string(&mut raw).is_err() {
        raw.clear();
    }
    let input: serde_json::Value = if raw.trim().is_empty() {
        serde_json::json!({})
    } else {
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                let document = serde_json::json!({
                    "type": "InvalidInput",
                    "detail": format!("input document is not valid JSON: {e}"),
                });
                eprintln!("{document}");
                std::process::exit(1);
            }
        }
    };

    let ctx = StageContext::from_settings(Settings::load());
    match run_process(process, &input, &ctx) {
        Ok(result) => {
            println!("{result}");
            Ok(())
        }
        Err(stage_error) => {
            error!(process, "stage failed: {stage_error}");
            eprintln!("{}", stage_error.to_document());
            std::process::exit(1);
        }
    }
}
