use crate::{
    config::Config, prediction::Predictor, routes::api_routes, session::SessionStore,
    telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct SharedState {
    pub predictor: Arc<dyn Predictor>,
    pub sessions: Arc<SessionStore>,
    pub metrics: Arc<Metrics>,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
    sessions: Arc<SessionStore>,
}

impl HttpServer {
    pub async fn new(predictor: Arc<dyn Predictor>, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let metrics = Arc::new(Metrics::new()?);
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let sessions = Arc::new(SessionStore::new(
            config.upload.max_bytes,
            &config.sessions,
        ));

        let app_state = SharedState {
            predictor,
            sessions: sessions.clone(),
            metrics,
        };

        let router = Router::new()
            .merge(api_routes())
            .with_state(app_state)
            .layer(DefaultBodyLimit::max(config.upload.get_body_limit()))
            .layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            router,
            listener,
            sessions,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.local_addr()?);

        self.sessions.clone().run_sweeper(shutdown_rx.resubscribe());

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}
