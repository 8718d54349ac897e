use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    manager::SessionManager,
    media::origin::MediaOrigin,
    signaling::session::SessionOptions,
    transport::Transport,
};

/// Everything a viewer connection needs. Owns no media state of its own,
/// the origin's tracks are shared with the pipeline bridge.
pub struct RelayState<T: Transport> {
    pub transport: Arc<T>,
    pub origin: Arc<MediaOrigin<T::Track>>,
    pub sessions: Arc<SessionManager>,
    pub options: SessionOptions,
    pub shutdown: CancellationToken,
    pipeline_started: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl<T: Transport> RelayState<T> {
    pub fn new(
        transport: Arc<T>,
        origin: Arc<MediaOrigin<T::Track>>,
        options: SessionOptions,
        shutdown: CancellationToken,
        pipeline_started: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            transport,
            origin,
            sessions: Arc::new(SessionManager::new()),
            options,
            shutdown,
            pipeline_started: Arc::new(pipeline_started),
        }
    }

    pub fn pipeline_started(&self) -> bool {
        (self.pipeline_started)()
    }
}

impl<T: Transport> Clone for RelayState<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            origin: Arc::clone(&self.origin),
            sessions: Arc::clone(&self.sessions),
            options: self.options,
            shutdown: self.shutdown.clone(),
            pipeline_started: Arc::clone(&self.pipeline_started),
        }
    }
}

pub(crate) fn app<T: Transport>(state: RelayState<T>) -> Router {
    Router::new()
        .route("/ws", get(crate::handler::viewer::ws_handler::<T>))
        .nest("/system", crate::handler::system::system_router::<T>())
        .with_state(state)
        .merge(relay_dashboard::app_router(None))
}

/// Serve on `listener` until `cancel` fires. Cancelling also ends every
/// viewer session, since their tokens derive from `state.shutdown`.
pub(crate) fn start_api_server<T: Transport>(
    listener: TcpListener,
    state: RelayState<T>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = app(state);
        if let Ok(addr) = listener.local_addr() {
            log::info!("API server started on {}", addr);
        }
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error running API server: {}", e);
        }
    })
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;
