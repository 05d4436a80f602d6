//! Application context: owns one instance of each subsystem, built
//! leaves-first and torn down in reverse order.

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::error::{BlackboxError, Result};
use crate::pipeline::PipelineCoordinator;
use crate::store::ContextStore;
use crate::thermal::{ThermalMonitor, ThermalState};
use crate::transport::Transport;

/// Owns the coordinator and its three dependencies for the process
/// lifetime. Constructed leaves-first: the thermal monitor and context
/// store, then the transport, then the coordinator composing all three.
pub struct AppContext {
    pub config: OrchestratorConfig,
    pub store: Arc<ContextStore>,
    pub thermal: Arc<ThermalMonitor>,
    pub transport: Arc<Transport>,
    pub coordinator: Arc<PipelineCoordinator>,
}

impl AppContext {
    /// Build the application from a validated config. Initializes the
    /// transport's shared-memory files and starts the thermal sampler.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot open its database file or the
    /// transport cannot initialize its shared-memory files.
    pub async fn build(config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(
            ContextStore::open(&config.store.db_path, config.security)
                .map_err(BlackboxError::Store)?,
        );
        let thermal = Arc::new(ThermalMonitor::new(config.thermal));
        thermal
            .register_callback(ThermalState::Critical, |state, temperatures| {
                tracing::warn!(
                    state = state.as_str(),
                    ?temperatures,
                    "thermal state entered critical"
                );
            })
            .await;
        thermal.start().await;

        let transport = Arc::new(Transport::new(config.transport.clone()));
        transport.initialize().await?;

        let coordinator = Arc::new(PipelineCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            Arc::clone(&thermal),
            config.deadlines,
            config.context,
        ));

        tracing::info!("application context ready");
        Ok(Self {
            config,
            store,
            thermal,
            transport,
            coordinator,
        })
    }

    /// Tear down in reverse construction order: transport, thermal sampler.
    /// The store and coordinator have no background resources to release.
    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
        self.thermal.stop().await;
        tracing::info!("application context shut down");
    }
}
