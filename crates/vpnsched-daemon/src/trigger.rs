//! Periodic trigger: reload the schedule, find the entry in effect, hand it
//! to the control client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;

/// `EX_TEMPFAIL` from sysexits.h.
pub const EXIT_RETRY: u8 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Success,
    /// Something transient went wrong; run again on the next interval.
    Retry,
}

/// One trigger pass. Safe to call repeatedly.
pub async fn run_once(ctx: &AppContext, now: DateTime<Utc>) -> TickOutcome {
    let reloaded = match ctx.storage.load_or_empty() {
        Ok(store) => {
            ctx.schedule.replace(store);
            true
        }
        Err(e) => {
            error!(
                path = %ctx.storage.path().display(),
                error = %e,
                "schedule reload failed, keeping previous schedule"
            );
            false
        }
    };

    let schedule = ctx.schedule.current();
    let retry = match schedule.active_action(now) {
        Some(entry) => {
            info!(%entry, "applying active schedule entry");
            let outcome = ctx.control.act(entry.action.clone()).await;
            debug!(?outcome, "act finished");
            outcome.should_retry()
        }
        None => {
            info!(entries = schedule.len(), "no schedule entry in effect");
            false
        }
    };

    if retry || !reloaded {
        TickOutcome::Retry
    } else {
        TickOutcome::Success
    }
}

/// Fire [`run_once`] every `trigger.interval_secs` until `shutdown` flips to
/// `true`. Ticks run one at a time; intervals missed while a tick was slow
/// are skipped.
pub async fn run(ctx: &AppContext, mut shutdown: watch::Receiver<bool>) {
    let trigger = &ctx.config.trigger;
    info!(
        interval_secs = trigger.interval().as_secs(),
        initial_delay_secs = trigger.initial_delay().as_secs(),
        "trigger started"
    );

    if !wait_or_shutdown(trigger.initial_delay(), &mut shutdown).await {
        info!("trigger stopped before first tick");
        return;
    }

    let mut interval = tokio::time::interval(trigger.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match run_once(ctx, Utc::now()).await {
                    TickOutcome::Success => debug!("tick complete"),
                    TickOutcome::Retry => warn!("tick incomplete, retrying next interval"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("trigger shutting down");
                    break;
                }
            }
        }
    }
}

/// Sleep for `delay`; returns `false` if shutdown was requested first.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use vpnsched_control::fake::{FakeCall, FakeConnector, FakeService};
    use vpnsched_core::VpnschedConfig;

    use super::*;

    const DOC: &str = "\
2025-09-01T06:00:00Z,START,work
2025-09-01T18:00:00Z,STOP
";

    struct Fixture {
        ctx: AppContext,
        service: Arc<FakeService>,
        connector: Arc<FakeConnector>,
        _dir: tempfile::TempDir,
    }

    fn fixture(document: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.csv");
        if let Some(document) = document {
            std::fs::write(&path, document).unwrap();
        }
        let mut config = VpnschedConfig::default();
        config.schedule.path = path;

        let service = FakeService::with_profiles(&[("u-work", "work")]);
        let connector = Arc::new(FakeConnector::new(service.clone()));
        let ctx = AppContext::with_connector(config, connector.clone(), None);
        Fixture {
            ctx,
            service,
            connector,
            _dir: dir,
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn active_entry_is_applied() {
        let f = fixture(Some(DOC));
        assert_eq!(run_once(&f.ctx, at(12)).await, TickOutcome::Success);
        assert_eq!(
            f.service.commands(),
            vec![FakeCall::StartProfile("u-work".to_string())]
        );

        assert_eq!(run_once(&f.ctx, at(18)).await, TickOutcome::Success);
        assert_eq!(f.service.commands().last(), Some(&FakeCall::Disconnect));
    }

    #[tokio::test]
    async fn nothing_in_effect_is_success() {
        let f = fixture(Some(DOC));
        assert_eq!(run_once(&f.ctx, at(5)).await, TickOutcome::Success);
        assert_eq!(f.connector.connects(), 0);

        let empty = fixture(None);
        assert_eq!(run_once(&empty.ctx, at(12)).await, TickOutcome::Success);
    }

    #[tokio::test]
    async fn bad_reload_keeps_previous_schedule() {
        let f = fixture(Some(DOC));
        assert_eq!(run_once(&f.ctx, at(12)).await, TickOutcome::Success);

        std::fs::write(f.ctx.storage.path(), "2025-09-01T20:00:00Z,FLY,away\n").unwrap();
        assert_eq!(run_once(&f.ctx, at(19)).await, TickOutcome::Retry);

        // The old document is still in force and was still applied.
        assert_eq!(f.ctx.schedule.current().len(), 2);
        assert_eq!(f.service.commands().last(), Some(&FakeCall::Disconnect));
    }

    #[tokio::test]
    async fn connect_failure_asks_for_retry() {
        let f = fixture(Some(DOC));
        f.connector.fail_next(1);
        assert_eq!(run_once(&f.ctx, at(12)).await, TickOutcome::Retry);
        assert_eq!(run_once(&f.ctx, at(12)).await, TickOutcome::Success);
    }

    #[tokio::test]
    async fn unknown_profile_is_not_retried() {
        let f = fixture(Some("2025-09-01T06:00:00Z,START,gone\n"));
        assert_eq!(run_once(&f.ctx, at(12)).await, TickOutcome::Success);
        assert!(f.service.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let f = fixture(Some(DOC));
        let (tx, rx) = watch::channel(false);
        let handle = {
            let ctx = &f.ctx;
            async move { run(ctx, rx).await }
        };
        let stopper = async {
            tokio::time::sleep(f.ctx.config.trigger.initial_delay() + Duration::from_secs(1)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(handle, stopper);
        assert_eq!(f.connector.connects(), 1);
    }
}
