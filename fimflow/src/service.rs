//! Service facade: wires the store, registry, supervisor, worker pool, and
//! HTTP surface into one lifecycle.

use crate::config::Settings;
use crate::http::{self, AppState};
use crate::registry::ProcessRegistry;
use crate::store::JobStore;
use crate::supervisor::Supervisor;
use crate::worker::WorkerPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("job store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("could not bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("service I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Grace given to in-flight jobs at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Service {
    settings: Settings,
    store: JobStore,
    registry: Arc<ProcessRegistry>,
}

impl Service {
    /// Opens the job store and builds the registry.
    pub fn new(settings: Settings) -> Result<Self, ServiceError> {
        let store = JobStore::open(&settings.store_path())?;
        Ok(Self {
            settings,
            store,
            registry: Arc::new(ProcessRegistry::standard()),
        })
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn router(&self) -> axum::Router {
        http::router(AppState {
            store: self.store.clone(),
            registry: Arc::clone(&self.registry),
        })
    }

    /// Runs the service until interrupted: worker pool plus HTTP listener.
    pub async fn run(self) -> Result<(), ServiceError> {
        let address = self.settings.listen_address();
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|source| ServiceError::Bind {
                address: address.clone(),
                source,
            })?;

        std::fs::create_dir_all(&self.settings.data_dir)?;
        let pid_path = self.settings.pid_path();
        std::fs::write(&pid_path, format!("{}\n", std::process::id()))?;

        let supervisor = Supervisor::new(self.store.clone(), &self.settings);
        supervisor.spawn_dismissal_listener();
        let pool = WorkerPool::start(self.store.clone(), supervisor, &self.settings);

        info!(
            address = %address,
            workers = pool.size(),
            store = %self.settings.store_path().display(),
            "service listening"
        );
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("shutting down");
        pool.shutdown(SHUTDOWN_GRACE).await;
        let _ = std::fs::remove_file(&pid_path);
        Ok(())
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_service_opens_store_in_data_dir() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let service = Service::new(settings).unwrap();
        assert!(dir.path().join("jobs.db").exists());
        let _router = service.router();
    }
}
