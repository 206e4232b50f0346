use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::auth::IdentityVerifier;
use crate::connection::ConnectionSettings;
use crate::persistence::ParticipantStore;
use crate::presence::Presence;
use crate::registry::Registry;
use crate::router::SignalRouter;

// Shared state of one server instance; every instance owns a fresh registry
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub router: SignalRouter,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub connection: ConnectionSettings,
    /// Renders `/metrics`; the route is only mounted when this is set.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        store: Arc<dyn ParticipantStore>,
        connection: ConnectionSettings,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let router = SignalRouter::new(Presence::new(registry.clone(), store));
        Self {
            registry,
            router,
            verifier,
            connection,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
