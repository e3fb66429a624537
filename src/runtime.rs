use std::future::Future;

use tokio::net::TcpListener;

use crate::config::{Config, RuntimeConfig};
use crate::error::Result;
use crate::service::MetadataService;

/// Binds the configured address and serves a [`MetadataService`] until shutdown.
pub struct MetadataRuntime {
    config: RuntimeConfig,
}

impl MetadataRuntime {
    /// Creates a runtime with the provided configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Consumes the runtime and starts serving the supplied service.
    pub async fn serve(self, service: MetadataService) -> Result<()> {
        serve(service, self.config).await
    }
}

/// Serves the service on `config.bind_addr` until Ctrl-C or SIGTERM.
pub async fn serve(service: MetadataService, config: RuntimeConfig) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    serve_on(listener, service, shutdown_signal()).await
}

/// Serves the service on an already bound listener until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, service: MetadataService, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(
        %addr,
        routes = service.routes().len(),
        "mock ec2 metadata service listening"
    );

    axum::serve(listener, service.into_router().into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("mock ec2 metadata service stopped");
    Ok(())
}

/// Discovers the config document, builds the route table and serves it.
pub async fn run() -> Result<()> {
    let (path, config) = Config::discover()?;
    tracing::info!(path = %path.display(), "loaded config");

    let runtime = RuntimeConfig::from_config(&config);
    let service = MetadataService::new(&config);
    MetadataRuntime::new(runtime).serve(service).await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
