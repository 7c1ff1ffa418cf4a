use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::registry::Registry;
use crate::router::{Clock, Router};

/// Shared handle passed to the listener and every session task.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<Registry>,
    pub router: Arc<Router>,
    shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(Registry::new(config.max_clients));
        let router = Arc::new(Router::new(Arc::clone(&registry)));
        Self::assemble(config, registry, router)
    }

    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(Registry::new(config.max_clients));
        let router = Arc::new(Router::with_clock(Arc::clone(&registry), clock));
        Self::assemble(config, registry, router)
    }

    fn assemble(config: ServerConfig, registry: Arc<Registry>, router: Arc<Router>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            router,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token for one session; cancelled on eviction or server shutdown.
    pub fn session_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops the listener and tears down every session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
