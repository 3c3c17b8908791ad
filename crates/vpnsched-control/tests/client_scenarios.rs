// End-to-end behaviour of the control client against the in-memory service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use vpnsched_control::fake::{FakeCall, FakeConnector, FakeService, ScriptedPrompt};
use vpnsched_control::{
    ActOutcome, ConnectionState, ControlError, PermissionGate, PermissionPrompt, StatusUpdate,
    VpnControlClient,
};
use vpnsched_protocol::methods;
use vpnsched_schedule::Action;

const PROFILES: &[(&str, &str)] = &[("u-work", "work"), ("u-home", "home")];

struct Harness {
    client: VpnControlClient,
    service: Arc<FakeService>,
    connector: Arc<FakeConnector>,
}

fn harness(
    connector: FakeConnector,
    service: Arc<FakeService>,
    prompt: Option<Arc<ScriptedPrompt>>,
) -> Harness {
    let connector = Arc::new(connector);
    let client = VpnControlClient::spawn(
        connector.clone(),
        prompt.map(|p| p as Arc<dyn PermissionPrompt>),
    );
    Harness {
        client,
        service,
        connector,
    }
}

fn authorized(prompt: Option<Arc<ScriptedPrompt>>) -> Harness {
    let service = FakeService::with_profiles(PROFILES);
    harness(FakeConnector::new(service.clone()), service, prompt)
}

async fn within<F: Future>(f: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("timed out")
}

async fn wait_for_state(client: &VpnControlClient, want: ConnectionState) {
    within(async {
        while client.state().await != want {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn start(name: &str) -> Action {
    Action::start(name).unwrap()
}

#[tokio::test]
async fn connects_on_demand_and_executes() {
    let h = authorized(None);
    assert_eq!(h.client.state().await, ConnectionState::Disconnected);

    assert_eq!(h.client.act(start("work")).await, ActOutcome::Executed);
    assert_eq!(h.client.state().await, ConnectionState::ConnectedAuthorized);
    assert_eq!(
        h.service.commands(),
        vec![FakeCall::StartProfile("u-work".to_string())]
    );

    // Second action reuses the live connection.
    assert_eq!(h.client.act(Action::stop()).await, ActOutcome::Executed);
    assert_eq!(h.connector.connects(), 1);
    assert!(h.service.calls().contains(&FakeCall::RegisterListener));
}

#[tokio::test]
async fn newer_action_replaces_pending_one() {
    let service = FakeService::with_profiles(PROFILES);
    service.require_permission(PermissionGate::Api);
    let prompt = Arc::new(ScriptedPrompt::manual().granting_into(service.clone()));
    let h = harness(
        FakeConnector::new(service.clone()),
        service,
        Some(prompt.clone()),
    );

    assert_eq!(
        h.client.act(start("work")).await,
        ActOutcome::AwaitingPermission
    );
    assert_eq!(
        h.client.act(start("home")).await,
        ActOutcome::AwaitingPermission
    );
    assert!(h.client.awaiting_permission().await);

    within(prompt.answer(true)).await;
    within(h.service.wait_for_commands(1)).await;
    settle().await;
    assert!(!h.client.awaiting_permission().await);

    // Only the latest action ran, and only one prompt was shown.
    assert_eq!(
        h.service.commands(),
        vec![FakeCall::StartProfile("u-home".to_string())]
    );
    assert_eq!(prompt.requests().len(), 1);
}

#[tokio::test]
async fn both_gates_prompt_in_order() {
    let service = FakeService::with_profiles(PROFILES);
    service.require_permission(PermissionGate::Api);
    service.require_permission(PermissionGate::Vpn);
    let prompt = Arc::new(ScriptedPrompt::granting().granting_into(service.clone()));
    let h = harness(
        FakeConnector::new(service.clone()),
        service,
        Some(prompt.clone()),
    );

    assert_eq!(
        h.client.act(Action::set_default("work").unwrap()).await,
        ActOutcome::AwaitingPermission
    );
    within(h.service.wait_for_commands(1)).await;

    let gates: Vec<_> = prompt.requests().iter().map(|r| r.gate).collect();
    assert_eq!(gates, vec![PermissionGate::Api, PermissionGate::Vpn]);
    wait_for_state(&h.client, ConnectionState::ConnectedAuthorized).await;

    // Grants stick: the next action runs straight through.
    assert_eq!(h.client.act(Action::stop()).await, ActOutcome::Executed);
    assert_eq!(prompt.requests().len(), 2);
}

#[tokio::test]
async fn unknown_profile_sends_no_command() {
    let h = authorized(None);

    let outcome = h.client.act(start("nope")).await;
    assert_eq!(
        outcome,
        ActOutcome::Failed(ControlError::ProfileNotFound {
            name: "nope".to_string()
        })
    );
    assert!(!outcome.should_retry());
    assert!(h.service.commands().is_empty());
}

#[tokio::test]
async fn set_default_and_start_targets_one_profile() {
    let h = authorized(None);

    assert_eq!(
        h.client
            .act(Action::set_default_and_start("home").unwrap())
            .await,
        ActOutcome::Executed
    );
    assert_eq!(
        h.service.commands(),
        vec![
            FakeCall::SetDefault("u-home".to_string()),
            FakeCall::StartProfile("u-home".to_string()),
        ]
    );
}

#[tokio::test]
async fn disconnect_while_pending_drops_the_action() {
    let service = FakeService::with_profiles(PROFILES);
    service.require_permission(PermissionGate::Api);
    let prompt = Arc::new(ScriptedPrompt::manual());
    let h = harness(
        FakeConnector::new(service.clone()),
        service,
        Some(prompt.clone()),
    );

    assert_eq!(
        h.client.act(start("work")).await,
        ActOutcome::AwaitingPermission
    );
    h.service.simulate_disconnect();
    wait_for_state(&h.client, ConnectionState::Disconnected).await;

    // A late answer to the old prompt must not revive the cleared action.
    within(prompt.answer(true)).await;
    settle().await;
    assert!(h.service.commands().is_empty());

    h.service.grant(PermissionGate::Api);
    assert_eq!(h.client.act(Action::stop()).await, ActOutcome::Executed);
    assert_eq!(h.connector.connects(), 2);
    assert_eq!(h.service.commands(), vec![FakeCall::Disconnect]);
}

#[tokio::test]
async fn headless_run_reports_missing_prompt() {
    let service = FakeService::with_profiles(PROFILES);
    service.require_permission(PermissionGate::Vpn);
    let h = harness(FakeConnector::new(service.clone()), service, None);

    assert_eq!(
        h.client.act(start("work")).await,
        ActOutcome::PermissionUnavailable
    );
    assert_eq!(
        h.client.state().await,
        ConnectionState::ConnectedUnauthorized
    );
    assert!(h.service.commands().is_empty());
}

#[tokio::test]
async fn denied_permission_frees_the_slot() {
    let service = FakeService::with_profiles(PROFILES);
    service.require_permission(PermissionGate::Api);
    let prompt = Arc::new(ScriptedPrompt::denying());
    let h = harness(
        FakeConnector::new(service.clone()),
        service,
        Some(prompt.clone()),
    );

    assert_eq!(
        h.client.act(start("work")).await,
        ActOutcome::AwaitingPermission
    );
    within(async {
        while prompt.requests().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    settle().await;
    assert!(h.service.commands().is_empty());

    // Nothing pending any more, so the next act prompts afresh.
    assert_eq!(
        h.client.act(start("home")).await,
        ActOutcome::AwaitingPermission
    );
    within(async {
        while prompt.requests().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn connect_failure_is_transient() {
    let h = authorized(None);
    h.connector.fail_next(1);

    let outcome = h.client.act(start("work")).await;
    assert!(matches!(
        outcome,
        ActOutcome::Failed(ControlError::Connection(_))
    ));
    assert!(outcome.should_retry());
    assert_eq!(h.client.state().await, ConnectionState::Disconnected);

    assert_eq!(h.client.act(start("work")).await, ActOutcome::Executed);
    assert_eq!(h.connector.connects(), 2);
}

#[tokio::test]
async fn newer_action_supersedes_one_waiting_for_connect() {
    let service = FakeService::with_profiles(PROFILES);
    let connector = FakeConnector::new(service.clone()).with_delay(Duration::from_millis(50));
    let h = harness(connector, service, None);

    let (first, second) = tokio::join!(h.client.act(start("work")), h.client.act(start("home")));

    assert_eq!(first, ActOutcome::Superseded);
    assert_eq!(second, ActOutcome::Executed);
    assert_eq!(h.connector.connects(), 1);
    assert_eq!(
        h.service.commands(),
        vec![FakeCall::StartProfile("u-home".to_string())]
    );
}

#[tokio::test]
async fn status_updates_do_not_change_state() {
    let h = authorized(None);
    assert_eq!(h.client.act(Action::stop()).await, ActOutcome::Executed);

    h.service.push_status(StatusUpdate {
        profile_id: Some("u-work".to_string()),
        state: "CONNECTED".to_string(),
        message: String::new(),
    });
    settle().await;
    assert_eq!(h.client.state().await, ConnectionState::ConnectedAuthorized);
}

#[tokio::test]
async fn unbind_releases_the_connection() {
    let h = authorized(None);
    assert_eq!(h.client.act(Action::stop()).await, ActOutcome::Executed);

    h.client.unbind().await;
    assert_eq!(h.client.state().await, ConnectionState::Disconnected);
    let calls = h.service.calls();
    assert!(calls.contains(&FakeCall::UnregisterListener));
    assert!(calls.contains(&FakeCall::Close));

    assert_eq!(h.client.act(Action::stop()).await, ActOutcome::Executed);
    assert_eq!(h.connector.connects(), 2);
}

#[tokio::test]
async fn act_after_shutdown_reports_stopped() {
    let h = authorized(None);
    h.client.shutdown().await;

    assert_eq!(
        h.client.act(Action::stop()).await,
        ActOutcome::Failed(ControlError::Stopped)
    );
    assert_eq!(h.connector.connects(), 0);
}

#[tokio::test]
async fn remote_failure_mid_dispatch_stops_the_sequence() {
    let h = authorized(None);
    h.service.fail_on(methods::PROFILE_SET_DEFAULT);

    let outcome = h
        .client
        .act(Action::set_default_and_start("work").unwrap())
        .await;
    match &outcome {
        ActOutcome::Failed(ControlError::Remote { method, .. }) => {
            assert_eq!(method, methods::PROFILE_SET_DEFAULT)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!outcome.should_retry());
    // The start never went out.
    assert_eq!(
        h.service.commands(),
        vec![FakeCall::SetDefault("u-work".to_string())]
    );

    // A rejected call leaves the connection in place.
    assert_eq!(h.client.state().await, ConnectionState::ConnectedAuthorized);
    assert_eq!(h.client.act(Action::stop()).await, ActOutcome::Executed);
    assert_eq!(h.connector.connects(), 1);
}
