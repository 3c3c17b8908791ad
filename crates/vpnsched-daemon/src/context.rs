use std::sync::Arc;

use tracing::{info, warn};
use vpnsched_control::{PermissionPrompt, RpcConnector, ServiceConnector, VpnControlClient};
use vpnsched_core::VpnschedConfig;
use vpnsched_schedule::{ScheduleFile, ScheduleStore, SharedSchedule};

/// Everything a trigger pass needs, built once per process.
pub struct AppContext {
    pub config: VpnschedConfig,
    pub schedule: SharedSchedule,
    pub storage: ScheduleFile,
    pub control: VpnControlClient,
}

impl AppContext {
    /// Wire up the production adapter. Must be called inside a Tokio runtime.
    pub fn init(config: VpnschedConfig, prompt: Option<Arc<dyn PermissionPrompt>>) -> Self {
        let connector = RpcConnector::new(
            config.control.address.clone(),
            config.control.connect_timeout(),
            config.control.request_timeout(),
        );
        Self::with_connector(config, Arc::new(connector), prompt)
    }

    pub fn with_connector(
        config: VpnschedConfig,
        connector: Arc<dyn ServiceConnector>,
        prompt: Option<Arc<dyn PermissionPrompt>>,
    ) -> Self {
        let storage = ScheduleFile::new(config.schedule.path.clone());
        let initial = storage.load_or_empty().unwrap_or_else(|e| {
            warn!(path = %storage.path().display(), error = %e, "stored schedule unreadable, starting empty");
            ScheduleStore::default()
        });
        info!(
            path = %storage.path().display(),
            entries = initial.len(),
            interactive = prompt.is_some(),
            "vpnsched context ready"
        );

        Self {
            schedule: SharedSchedule::new(initial),
            control: VpnControlClient::spawn(connector, prompt),
            storage,
            config,
        }
    }

    /// Release the control service connection and stop the client actor.
    pub async fn shutdown(&self) {
        self.control.shutdown().await;
        info!("vpnsched context shut down");
    }
}
