mod context;
mod rpc;

use std::sync::Arc;

use chrono::Duration;
use resonate_scheduler::{ScheduledTask, Scheduler, SchedulerEvent};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use context::AppContext;

const TASK_DAILY_REBUILD: &str = "daily_rebuild";
const TASK_CHM_SWEEP: &str = "chm_sweep";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = resonate_config::AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())))
        .init();

    let scheduler_db = Arc::new(sled::open(&config.stores.scheduler_path)?);
    let scheduler = Scheduler::new(scheduler_db);
    register_jobs(&scheduler, &config.scheduler)?;

    let ctx = AppContext::build(config)?;

    let (mut events, _tick_handle) = scheduler.start(Duration::minutes(1))?;
    tracing::info!("resonate-service started");

    while let Some(event) = events.recv().await {
        dispatch(&ctx, event).await;
    }

    Ok(())
}

fn register_jobs(scheduler: &Scheduler, settings: &resonate_config::SchedulerSettings) -> anyhow::Result<()> {
    let existing: std::collections::HashSet<String> =
        scheduler.list_tasks()?.into_iter().map(|t| t.name).collect();

    if !existing.contains(TASK_DAILY_REBUILD) {
        scheduler.add_task(ScheduledTask {
            id: Uuid::new_v4(),
            name: TASK_DAILY_REBUILD.into(),
            cron: Some(settings.daily_rebuild_cron.clone()),
            event_trigger: None,
            payload: serde_json::json!({}),
            created_at: chrono::Utc::now(),
            next_run_at: None,
            last_run_at: None,
            enabled: true,
        })?;
    }

    if !existing.contains(TASK_CHM_SWEEP) {
        scheduler.add_task(ScheduledTask {
            id: Uuid::new_v4(),
            name: TASK_CHM_SWEEP.into(),
            cron: Some(settings.chm_sweep_cron.clone()),
            event_trigger: None,
            payload: serde_json::json!({}),
            created_at: chrono::Utc::now(),
            next_run_at: None,
            last_run_at: None,
            enabled: true,
        })?;
    }

    Ok(())
}

async fn dispatch(ctx: &AppContext, event: SchedulerEvent) {
    match event {
        SchedulerEvent::Fired { task_name, trigger, .. } => {
            tracing::info!(task = %task_name, trigger = ?trigger, "scheduled task fired");
            match task_name.as_str() {
                TASK_DAILY_REBUILD => run_daily_rebuild(ctx).await,
                TASK_CHM_SWEEP => run_chm_sweep(ctx).await,
                other => tracing::warn!(task = %other, "fired task has no registered handler"),
            }
        }
        SchedulerEvent::MisfireDetected { task_name, scheduled_for, .. } => {
            tracing::warn!(task = %task_name, scheduled_for = %scheduled_for, "misfire detected, task rescheduled");
        }
    }
}

async fn run_daily_rebuild(ctx: &AppContext) {
    let report = resonate_rpb::rebuild_stale_profiles(
        ctx.store.as_ref(),
        ctx.vector_store.as_ref(),
        ctx.cache.as_ref(),
        ctx.embedder.as_ref(),
        30,
    )
    .await;

    match report {
        Ok(r) => tracing::info!(
            scanned = r.scanned,
            rebuilt = r.rebuilt,
            skipped_fresh = r.skipped_fresh,
            failed = r.failed,
            "daily rpb rebuild sweep complete"
        ),
        Err(e) => tracing::error!(error = %e, "daily rpb rebuild sweep failed"),
    }
}

async fn run_chm_sweep(ctx: &AppContext) {
    let completer = ctx.completer.clone();
    let store = ctx.store.clone();
    let interest_tags_for = move |_user_id: Uuid| -> Vec<String> {
        // The store doesn't carry a dedicated interest-tags field on `User`;
        // nudges fall back to a generic tag set until that's added.
        vec!["music".into(), "travel".into(), "food".into()]
    };

    let report = resonate_chm::run_health_sweep(store.as_ref(), completer.as_ref(), interest_tags_for).await;

    match report {
        Ok(r) => tracing::info!(
            scanned = r.scanned,
            state_changed = r.state_changed,
            nudges_generated = r.nudges_generated,
            failed = r.failed,
            "chm sweep complete"
        ),
        Err(e) => tracing::error!(error = %e, "chm sweep failed"),
    }
}
