//! In-process stand-ins for the control service and the operator prompt.
//!
//! Used by this crate's tests and by the daemon's trigger tests. The fake
//! service records every call so tests can assert exactly which commands
//! reached it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};
use vpnsched_protocol::methods;

use crate::{
    client::ServiceLink,
    error::ControlError,
    service::{ControlService, PermissionPrompt, ServiceConnector},
    types::{PermissionGate, PermissionRequest, StatusUpdate, VpnProfile},
};

/// One recorded call on a [`FakeService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    PrepareApi,
    PrepareVpn,
    ListProfiles,
    StartProfile(String),
    Disconnect,
    SetDefault(String),
    RegisterListener,
    UnregisterListener,
    Close,
}

impl FakeCall {
    /// Calls that change VPN state, as opposed to queries and bookkeeping.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            FakeCall::StartProfile(_) | FakeCall::Disconnect | FakeCall::SetDefault(_)
        )
    }
}

struct FakeState {
    profiles: Vec<VpnProfile>,
    api_granted: bool,
    vpn_granted: bool,
    failing: Option<&'static str>,
    calls: Vec<FakeCall>,
    link: Option<ServiceLink>,
    listener: Option<ServiceLink>,
}

/// Scriptable in-memory control service.
pub struct FakeService {
    state: Mutex<FakeState>,
    changed: Notify,
}

impl FakeService {
    /// A service that already granted both permissions.
    pub fn with_profiles(profiles: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                profiles: profiles
                    .iter()
                    .map(|(id, name)| VpnProfile {
                        id: id.to_string(),
                        name: name.to_string(),
                    })
                    .collect(),
                api_granted: true,
                vpn_granted: true,
                failing: None,
                calls: Vec::new(),
                link: None,
                listener: None,
            }),
            changed: Notify::new(),
        })
    }

    /// Make `gate` ask for permission until [`grant`](Self::grant) is called.
    pub fn require_permission(&self, gate: PermissionGate) {
        self.set_granted(gate, false);
    }

    pub fn grant(&self, gate: PermissionGate) {
        self.set_granted(gate, true);
    }

    /// Fail every call of the RPC method `method` (see [`methods`]).
    pub fn fail_on(&self, method: &'static str) {
        self.lock().failing = Some(method);
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }

    /// Only the state-changing calls, in order.
    pub fn commands(&self) -> Vec<FakeCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_command())
            .cloned()
            .collect()
    }

    /// Wait until at least `n` commands have been recorded.
    pub async fn wait_for_commands(&self, n: usize) {
        loop {
            let notified = self.changed.notified();
            if self.commands().len() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Push a status notification to the registered listener, if any.
    pub fn push_status(&self, update: StatusUpdate) {
        let listener = self.lock().listener.clone();
        if let Some(listener) = listener {
            listener.status(update);
        }
    }

    /// Behave as if the service process died.
    pub fn simulate_disconnect(&self) {
        let link = self.lock().link.take();
        if let Some(link) = link {
            link.disconnected();
        }
    }

    fn attach(&self, link: ServiceLink) {
        self.lock().link = Some(link);
    }

    fn set_granted(&self, gate: PermissionGate, granted: bool) {
        let mut state = self.lock();
        match gate {
            PermissionGate::Api => state.api_granted = granted,
            PermissionGate::Vpn => state.vpn_granted = granted,
        }
    }

    fn record(&self, call: FakeCall, method: &'static str) -> Result<(), ControlError> {
        let failing = {
            let mut state = self.lock();
            state.calls.push(call);
            state.failing == Some(method)
        };
        self.changed.notify_waiters();
        if failing {
            return Err(ControlError::remote(method, "injected failure"));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake service lock poisoned")
    }
}

#[async_trait]
impl ControlService for FakeService {
    async fn prepare_api_permission(&self) -> Result<Option<PermissionRequest>, ControlError> {
        self.record(FakeCall::PrepareApi, methods::PERMISSION_PREPARE_API)?;
        Ok((!self.lock().api_granted).then(|| PermissionRequest {
            gate: PermissionGate::Api,
            token: "api-consent".to_string(),
        }))
    }

    async fn prepare_vpn_permission(&self) -> Result<Option<PermissionRequest>, ControlError> {
        self.record(FakeCall::PrepareVpn, methods::PERMISSION_PREPARE_VPN)?;
        Ok((!self.lock().vpn_granted).then(|| PermissionRequest {
            gate: PermissionGate::Vpn,
            token: "vpn-consent".to_string(),
        }))
    }

    async fn list_profiles(&self) -> Result<Vec<VpnProfile>, ControlError> {
        self.record(FakeCall::ListProfiles, methods::PROFILES_LIST)?;
        Ok(self.lock().profiles.clone())
    }

    async fn start_profile(&self, id: &str) -> Result<(), ControlError> {
        self.record(FakeCall::StartProfile(id.to_string()), methods::PROFILE_START)
    }

    async fn disconnect(&self) -> Result<(), ControlError> {
        self.record(FakeCall::Disconnect, methods::VPN_DISCONNECT)
    }

    async fn set_default_profile(&self, id: &str) -> Result<(), ControlError> {
        self.record(
            FakeCall::SetDefault(id.to_string()),
            methods::PROFILE_SET_DEFAULT,
        )
    }

    async fn register_status_listener(&self, listener: ServiceLink) -> Result<(), ControlError> {
        self.record(FakeCall::RegisterListener, methods::STATUS_SUBSCRIBE)?;
        self.lock().listener = Some(listener);
        Ok(())
    }

    async fn unregister_status_listener(&self) -> Result<(), ControlError> {
        self.lock().listener = None;
        self.record(FakeCall::UnregisterListener, methods::STATUS_UNSUBSCRIBE)
    }

    async fn close(&self) {
        let _ = self.record(FakeCall::Close, "close");
    }
}

/// Connector that always hands out the same [`FakeService`].
pub struct FakeConnector {
    service: Arc<FakeService>,
    delay: Duration,
    connects: AtomicUsize,
    failures_left: AtomicUsize,
}

impl FakeConnector {
    pub fn new(service: Arc<FakeService>) -> Self {
        Self {
            service,
            delay: Duration::ZERO,
            connects: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        }
    }

    /// Hold every connect attempt for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Refuse the next `n` connect attempts.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of connect attempts so far, failed ones included.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceConnector for FakeConnector {
    async fn connect(&self, link: ServiceLink) -> Result<Arc<dyn ControlService>, ControlError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ControlError::Connection("connection refused".to_string()));
        }
        self.service.attach(link);
        Ok(self.service.clone())
    }
}

enum PromptMode {
    Auto(bool),
    Manual,
}

/// Operator stand-in: answers automatically, or waits for the test to call
/// [`answer`](ScriptedPrompt::answer).
pub struct ScriptedPrompt {
    mode: PromptMode,
    service: Option<Arc<FakeService>>,
    requests: Mutex<Vec<PermissionRequest>>,
    outstanding: Mutex<VecDeque<oneshot::Sender<bool>>>,
    arrived: Notify,
}

impl ScriptedPrompt {
    pub fn granting() -> Self {
        Self::new(PromptMode::Auto(true))
    }

    pub fn denying() -> Self {
        Self::new(PromptMode::Auto(false))
    }

    pub fn manual() -> Self {
        Self::new(PromptMode::Manual)
    }

    /// Record grants on `service` so later permission checks pass.
    pub fn granting_into(mut self, service: Arc<FakeService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Answer the oldest outstanding request, waiting for one if needed.
    pub async fn answer(&self, granted: bool) {
        loop {
            let next = self
                .outstanding
                .lock()
                .expect("prompt lock poisoned")
                .pop_front();
            if let Some(tx) = next {
                let _ = tx.send(granted);
                return;
            }
            self.arrived.notified().await;
        }
    }

    pub fn requests(&self) -> Vec<PermissionRequest> {
        self.requests.lock().expect("prompt lock poisoned").clone()
    }

    fn new(mode: PromptMode) -> Self {
        Self {
            mode,
            service: None,
            requests: Mutex::new(Vec::new()),
            outstanding: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
        }
    }
}

#[async_trait]
impl PermissionPrompt for ScriptedPrompt {
    async fn request(&self, request: PermissionRequest) -> bool {
        let gate = request.gate;
        self.requests
            .lock()
            .expect("prompt lock poisoned")
            .push(request);

        let granted = match self.mode {
            PromptMode::Auto(granted) => granted,
            PromptMode::Manual => {
                let (tx, rx) = oneshot::channel();
                self.outstanding
                    .lock()
                    .expect("prompt lock poisoned")
                    .push_back(tx);
                self.arrived.notify_one();
                rx.await.unwrap_or(false)
            }
        };

        if granted {
            if let Some(service) = &self.service {
                service.grant(gate);
            }
        }
        granted
    }
}
