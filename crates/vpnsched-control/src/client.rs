//! The VPN control client: a single-task state machine fronted by a cloneable
//! handle.
//!
//! All connection state (service handle, connection state, pending slot)
//! lives inside one actor task and is only touched while that task processes
//! a message from its mailbox. Connect requests and permission prompts run in
//! spawned tasks that post their result back as a message, so they never
//! block the mailbox and never mutate state directly.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use vpnsched_schedule::{Action, Command};

use crate::{
    error::ControlError,
    service::{ControlService, PermissionPrompt, ServiceConnector},
    types::{ActOutcome, ConnectionState, PermissionGate, PermissionRequest, StatusUpdate},
};

/// Messages processed by the actor, in arrival order.
enum Msg {
    Act {
        action: Action,
        reply: oneshot::Sender<ActOutcome>,
    },
    Connected {
        generation: u64,
        result: Result<Arc<dyn ControlService>, ControlError>,
    },
    Disconnected {
        generation: u64,
    },
    Status {
        generation: u64,
        update: StatusUpdate,
    },
    PermissionResult {
        ticket: u64,
        granted: bool,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    AwaitingPermission {
        reply: oneshot::Sender<bool>,
    },
    Unbind {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Callback channel from a service adapter back into the client.
///
/// Each link is tied to one connection attempt; reports arriving through a
/// link whose connection has since been replaced or released are ignored.
#[derive(Clone)]
pub struct ServiceLink {
    tx: mpsc::WeakUnboundedSender<Msg>,
    generation: u64,
}

impl ServiceLink {
    /// The service went away (peer closed, transport error, process died).
    pub fn disconnected(&self) {
        self.post(Msg::Disconnected {
            generation: self.generation,
        });
    }

    /// Forward a status notification pushed by the service.
    pub fn status(&self, update: StatusUpdate) {
        self.post(Msg::Status {
            generation: self.generation,
            update,
        });
    }

    fn post(&self, msg: Msg) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(msg);
        }
    }
}

impl std::fmt::Debug for ServiceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLink")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Handle to the control client actor. Cheap to clone.
///
/// The actor stops when [`shutdown`](Self::shutdown) is called or when the
/// last handle is dropped and no connect or prompt task is still in flight.
#[derive(Clone)]
pub struct VpnControlClient {
    tx: mpsc::UnboundedSender<Msg>,
}

impl VpnControlClient {
    /// Start the actor on the current Tokio runtime.
    ///
    /// Pass `None` for `prompt` in headless runs: commands that need a
    /// permission grant are then dropped with
    /// [`ActOutcome::PermissionUnavailable`].
    pub fn spawn(
        connector: Arc<dyn ServiceConnector>,
        prompt: Option<Arc<dyn PermissionPrompt>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            connector,
            prompt,
            tx: tx.downgrade(),
            state: ConnectionState::Disconnected,
            generation: 0,
            service: None,
            awaiting_connect: None,
            pending: None,
            next_ticket: 0,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Get `action` to the control service: connect if needed, pass both
    /// permission gates, then dispatch.
    ///
    /// Returns once the command ran, failed, or was parked waiting for a
    /// permission grant. Never fails outward; see [`ActOutcome`].
    pub async fn act(&self, action: Action) -> ActOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Msg::Act { action, reply }).is_err() {
            return ActOutcome::Failed(ControlError::Stopped);
        }
        rx.await
            .unwrap_or(ActOutcome::Failed(ControlError::Stopped))
    }

    pub async fn state(&self) -> ConnectionState {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Msg::State { reply }).is_err() {
            return ConnectionState::Disconnected;
        }
        rx.await.unwrap_or(ConnectionState::Disconnected)
    }

    /// Whether an action is parked waiting for a permission answer.
    ///
    /// Answered after every earlier message has been handled, so once this
    /// returns `false` a granted action has also finished executing.
    pub async fn awaiting_permission(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Msg::AwaitingPermission { reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Release the service connection and clear any pending action.
    pub async fn unbind(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Msg::Unbind { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Unbind and stop the actor.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Msg::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

/// An `act()` call waiting for the connection to come up.
struct Waiter {
    action: Action,
    reply: oneshot::Sender<ActOutcome>,
}

/// Deferred work awaiting a permission result. The caller has already been
/// answered with [`ActOutcome::AwaitingPermission`].
struct Pending {
    action: Action,
    gate: PermissionGate,
    ticket: u64,
}

struct Actor {
    connector: Arc<dyn ServiceConnector>,
    prompt: Option<Arc<dyn PermissionPrompt>>,
    /// Weak so that dropping every handle lets the mailbox close.
    tx: mpsc::WeakUnboundedSender<Msg>,
    state: ConnectionState,
    /// Bumped on every connect attempt and every release.
    generation: u64,
    /// Present only while connected.
    service: Option<Arc<dyn ControlService>>,
    /// Single slot: a newer `act()` during connect supersedes the older one.
    awaiting_connect: Option<Waiter>,
    /// Single slot: a newer `act()` during a prompt replaces the older one.
    pending: Option<Pending>,
    next_ticket: u64,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
        debug!("control client started");
        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Act { action, reply } => self.on_act(action, reply).await,
                Msg::Connected { generation, result } => {
                    self.on_connected(generation, result).await
                }
                Msg::Disconnected { generation } => self.on_disconnected(generation).await,
                Msg::Status { generation, update } => self.on_status(generation, update),
                Msg::PermissionResult { ticket, granted } => {
                    self.on_permission_result(ticket, granted).await
                }
                Msg::State { reply } => {
                    let _ = reply.send(self.state);
                }
                Msg::AwaitingPermission { reply } => {
                    let _ = reply.send(self.pending.is_some());
                }
                Msg::Unbind { reply } => {
                    self.release("unbind requested").await;
                    let _ = reply.send(());
                }
                Msg::Shutdown { reply } => {
                    self.release("client shutting down").await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!("control client stopped");
    }

    async fn on_act(&mut self, action: Action, reply: oneshot::Sender<ActOutcome>) {
        debug!(%action, state = %self.state, "act requested");
        match self.state {
            ConnectionState::Disconnected => {
                self.awaiting_connect = Some(Waiter { action, reply });
                self.start_connect();
            }
            ConnectionState::Connecting => {
                if let Some(prev) = self.awaiting_connect.replace(Waiter { action, reply }) {
                    info!(superseded = %prev.action, "newer action replaces one waiting for connection");
                    let _ = prev.reply.send(ActOutcome::Superseded);
                }
            }
            ConnectionState::ConnectedUnauthorized | ConnectionState::ConnectedAuthorized => {
                if let Some(pending) = self.pending.as_mut() {
                    info!(
                        replaced = %pending.action,
                        %action,
                        "permission prompt outstanding, replacing pending action"
                    );
                    pending.action = action;
                    let _ = reply.send(ActOutcome::AwaitingPermission);
                } else {
                    let outcome = self.authorize_and_execute(action, PermissionGate::Api).await;
                    self.release_if_broken(&outcome).await;
                    let _ = reply.send(outcome);
                }
            }
        }
    }

    fn start_connect(&mut self) {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let generation = self.generation;
        let link = self.link();
        let connector = Arc::clone(&self.connector);
        info!(generation, "connecting to control service");
        tokio::spawn(async move {
            let result = connector.connect(link).await;
            let _ = tx.send(Msg::Connected { generation, result });
        });
    }

    async fn on_connected(
        &mut self,
        generation: u64,
        result: Result<Arc<dyn ControlService>, ControlError>,
    ) {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            debug!(generation, "ignoring stale connect result");
            if let Ok(service) = result {
                service.close().await;
            }
            return;
        }

        let service = match result {
            Ok(service) => service,
            Err(e) => {
                error!(error = %e, "control service connect failed");
                self.state = ConnectionState::Disconnected;
                if let Some(waiter) = self.awaiting_connect.take() {
                    let _ = waiter.reply.send(ActOutcome::Failed(e));
                }
                return;
            }
        };

        info!(generation, "control service connected");
        self.state = ConnectionState::ConnectedUnauthorized;
        if let Err(e) = service.register_status_listener(self.link()).await {
            warn!(error = %e, "status listener registration failed");
        }
        self.service = Some(service);

        if let Some(waiter) = self.awaiting_connect.take() {
            let outcome = self
                .authorize_and_execute(waiter.action, PermissionGate::Api)
                .await;
            self.release_if_broken(&outcome).await;
            let _ = waiter.reply.send(outcome);
        }
    }

    async fn on_disconnected(&mut self, generation: u64) {
        if generation != self.generation {
            debug!(generation, "ignoring disconnect from a released connection");
            return;
        }
        warn!(generation, "control service disconnected");
        self.release("service disconnected").await;
    }

    fn on_status(&self, generation: u64, update: StatusUpdate) {
        if generation != self.generation {
            return;
        }
        info!(
            profile_id = update.profile_id.as_deref().unwrap_or("-"),
            state = %update.state,
            message = %update.message,
            "vpn status"
        );
    }

    async fn on_permission_result(&mut self, ticket: u64, granted: bool) {
        if self.pending.as_ref().map(|p| p.ticket) != Some(ticket) {
            debug!(ticket, "ignoring stale permission result");
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };

        if !granted {
            warn!(
                gate = %pending.gate,
                action = %pending.action,
                "permission denied, pending action dropped"
            );
            return;
        }

        info!(gate = %pending.gate, action = %pending.action, "permission granted, resuming");
        let outcome = match pending.gate {
            PermissionGate::Api => {
                self.authorize_and_execute(pending.action, PermissionGate::Vpn)
                    .await
            }
            PermissionGate::Vpn => self.execute_authorized(pending.action).await,
        };
        self.release_if_broken(&outcome).await;
        debug!(?outcome, "resumed action finished");
    }

    /// Run the permission gates from `start_at` onwards, then dispatch.
    async fn authorize_and_execute(
        &mut self,
        action: Action,
        start_at: PermissionGate,
    ) -> ActOutcome {
        let Some(service) = self.service.clone() else {
            return failed(
                &action,
                ControlError::Connection("control service not connected".to_string()),
            );
        };

        if start_at == PermissionGate::Api {
            match service.prepare_api_permission().await {
                Ok(Some(request)) => return self.park(action, request),
                Ok(None) => {}
                Err(e) => return failed(&action, e),
            }
        }

        match service.prepare_vpn_permission().await {
            Ok(Some(request)) => return self.park(action, request),
            Ok(None) => {}
            Err(e) => return failed(&action, e),
        }

        self.execute_authorized(action).await
    }

    async fn execute_authorized(&mut self, action: Action) -> ActOutcome {
        let Some(service) = self.service.clone() else {
            return failed(
                &action,
                ControlError::Connection("control service not connected".to_string()),
            );
        };
        self.state = ConnectionState::ConnectedAuthorized;
        match run_command(service.as_ref(), &action).await {
            Ok(()) => {
                info!(%action, "command executed");
                ActOutcome::Executed
            }
            Err(e) => failed(&action, e),
        }
    }

    /// Stash `action` until the operator answers `request`.
    fn park(&mut self, action: Action, request: PermissionRequest) -> ActOutcome {
        self.state = ConnectionState::ConnectedUnauthorized;

        let Some(prompt) = self.prompt.clone() else {
            warn!(
                gate = %request.gate,
                %action,
                "permission required but no prompt is available, dropping command"
            );
            return ActOutcome::PermissionUnavailable;
        };
        let Some(tx) = self.tx.upgrade() else {
            return ActOutcome::Failed(ControlError::Stopped);
        };

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        info!(gate = %request.gate, %action, "permission required, prompting operator");
        self.pending = Some(Pending {
            action,
            gate: request.gate,
            ticket,
        });

        tokio::spawn(async move {
            let granted = prompt.request(request).await;
            let _ = tx.send(Msg::PermissionResult { ticket, granted });
        });
        ActOutcome::AwaitingPermission
    }

    /// Drop the connection: handle, pending slot and any waiting caller.
    async fn release(&mut self, reason: &str) {
        self.generation += 1;
        self.state = ConnectionState::Disconnected;

        if let Some(pending) = self.pending.take() {
            info!(action = %pending.action, reason, "pending action cleared");
        }
        if let Some(waiter) = self.awaiting_connect.take() {
            let _ = waiter
                .reply
                .send(ActOutcome::Failed(ControlError::Connection(reason.to_string())));
        }
        if let Some(service) = self.service.take() {
            if let Err(e) = service.unregister_status_listener().await {
                debug!(error = %e, "status listener deregistration failed");
            }
            service.close().await;
        }
    }

    /// A connection failure on the live handle means it is dead; drop it so
    /// the next `act()` reconnects.
    async fn release_if_broken(&mut self, outcome: &ActOutcome) {
        if self.service.is_some()
            && matches!(outcome, ActOutcome::Failed(ControlError::Connection(_)))
        {
            self.release("control service connection broken").await;
        }
    }

    fn link(&self) -> ServiceLink {
        ServiceLink {
            tx: self.tx.clone(),
            generation: self.generation,
        }
    }
}

/// Log a failed action with enough context to diagnose it.
fn failed(action: &Action, error: ControlError) -> ActOutcome {
    error!(
        command = %action.command(),
        profile = action.profile().unwrap_or("-"),
        transient = error.is_transient(),
        error = %error,
        "action failed"
    );
    ActOutcome::Failed(error)
}

/// Dispatch one authorized command.
async fn run_command(service: &dyn ControlService, action: &Action) -> Result<(), ControlError> {
    match action.command() {
        Command::Start => {
            let id = resolve_profile(service, profile_arg(action)?).await?;
            service.start_profile(&id).await?;
            debug!(%id, "profile started");
        }
        Command::Stop => {
            service.disconnect().await?;
            debug!("vpn disconnected");
        }
        Command::SetDefault => {
            let id = resolve_profile(service, profile_arg(action)?).await?;
            service.set_default_profile(&id).await?;
            debug!(%id, "default profile set");
        }
        Command::SetDefaultAndStart => {
            // Resolve once so both calls target the same profile even if the
            // list changes in between.
            let id = resolve_profile(service, profile_arg(action)?).await?;
            service.set_default_profile(&id).await?;
            service.start_profile(&id).await?;
            debug!(%id, "default profile set and started");
        }
    }
    Ok(())
}

fn profile_arg(action: &Action) -> Result<&str, ControlError> {
    action.profile().ok_or_else(|| {
        ControlError::InvalidAction(format!("{} requires a profile name", action.command()))
    })
}

/// Exact, case-sensitive name → id lookup.
async fn resolve_profile(service: &dyn ControlService, name: &str) -> Result<String, ControlError> {
    service
        .list_profiles()
        .await?
        .into_iter()
        .find(|p| p.name == name)
        .map(|p| p.id)
        .ok_or_else(|| ControlError::ProfileNotFound {
            name: name.to_string(),
        })
}
