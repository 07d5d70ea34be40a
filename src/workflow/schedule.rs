use super::{Trigger, Workflow};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::future::Future;
use tracing::{error, info, warn};

/// Next daily fire time strictly after `now`.
pub fn next_fire_after(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Run the workflow once a day at `at` (UTC) until Ctrl-C, or until
/// `max_runs` runs have completed. Runs never overlap: a long run pushes the
/// next fire time to the following slot.
pub async fn run_daily(workflow: &Workflow, at: NaiveTime, max_runs: Option<usize>) {
    run_daily_until(workflow, at, max_runs, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Like [`run_daily`], stopping when `shutdown` completes. Shutdown is
/// observed both while waiting and while a run is in progress; an
/// interrupted run is dropped, which kills its child processes.
pub async fn run_daily_until<F>(workflow: &Workflow, at: NaiveTime, max_runs: Option<usize>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut runs = 0usize;
    loop {
        if max_runs.is_some_and(|max| runs >= max) {
            break;
        }

        let now = Utc::now();
        let next = next_fire_after(now, at);
        let wait = (next - now).to_std().unwrap_or_default();
        info!("Next scheduled run at {} (in {}s)", next.to_rfc3339(), wait.as_secs());

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut shutdown => {
                warn!("Shutdown requested, stopping scheduler");
                break;
            }
        }

        tokio::select! {
            result = workflow.run(Trigger::Schedule) => match result {
                Ok(report) => info!(outcome = %report.outcome, run_id = %report.run_id, "Scheduled run finished"),
                Err(e) => error!("Scheduled run failed: {}", e),
            },
            _ = &mut shutdown => {
                warn!("Shutdown requested during a run, aborting it");
                break;
            }
        }
        runs += 1;
    }
}
