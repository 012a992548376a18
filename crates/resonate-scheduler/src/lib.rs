//! Persistent task scheduler.
//!
//! Backs the two things the core needs triggered on a schedule or on a named
//! event: `sled`-backed task persistence (tasks survive restart), a tick loop
//! that fires due cron tasks, and [`Scheduler::emit`] for firing the tasks
//! registered against a named event (`resonate/voice-note-uploaded`,
//! `resonate/profile-rebuilt`, `resonate/account-deleted`).

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const SLED_TREE: &str = "scheduled_tasks";

/// A persisted scheduled task. Registered with a cron expression, an event
/// trigger name, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub name: String,
    /// Cron expression (e.g. "0 0 3 * * *"), if this task runs on a schedule.
    pub cron: Option<String>,
    /// Event name (e.g. "resonate/voice-note-uploaded"), if this task also
    /// fires when that event is emitted.
    pub event_trigger: Option<String>,
    pub payload: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

/// Events emitted by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SchedulerEvent {
    Fired {
        task_id: Uuid,
        task_name: String,
        payload: serde_json::Value,
        fired_at: DateTime<Utc>,
        trigger: TriggerKind,
    },
    MisfireDetected {
        task_id: Uuid,
        task_name: String,
        payload: serde_json::Value,
        scheduled_for: DateTime<Utc>,
        detected_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TriggerKind {
    Cron,
    Event(String),
}

#[derive(Clone)]
pub struct Scheduler {
    db: Arc<sled::Db>,
}

impl Scheduler {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    fn tree(&self) -> Result<sled::Tree> {
        self.db
            .open_tree(SLED_TREE)
            .with_context(|| format!("open sled tree {SLED_TREE}"))
    }

    fn next_occurrence(cron: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Schedule::from_str(cron).ok().and_then(|s| s.upcoming(Utc).next())
    }

    /// Detect cron tasks with `next_run_at` in the past, reschedule them, and
    /// report the misfire. Event-triggered-only tasks have no `next_run_at`
    /// and can't misfire.
    fn check_for_misfires(&self) -> Result<Vec<SchedulerEvent>> {
        let now = Utc::now();
        let tasks = self.list_tasks()?;

        let mut out = Vec::new();
        for mut task in tasks.into_iter() {
            if !task.enabled {
                continue;
            }
            let Some(next_run_at) = task.next_run_at else {
                continue;
            };
            if next_run_at >= now {
                continue;
            }

            out.push(SchedulerEvent::MisfireDetected {
                task_id: task.id,
                task_name: task.name.clone(),
                payload: task.payload.clone(),
                scheduled_for: next_run_at,
                detected_at: now,
            });

            if let Some(cron) = task.cron.clone() {
                task.next_run_at = Self::next_occurrence(&cron, now);
                let _ = self.add_task(task);
            }
        }

        Ok(out)
    }

    pub fn add_task(&self, mut task: ScheduledTask) -> Result<ScheduledTask> {
        if task.cron.is_none() && task.event_trigger.is_none() {
            anyhow::bail!("task {} has neither a cron schedule nor an event trigger", task.name);
        }
        if let Some(cron) = &task.cron {
            Schedule::from_str(cron).map_err(|e| anyhow::anyhow!("invalid cron expression: {e}"))?;
        }

        let tree = self.tree()?;

        let now = Utc::now();
        if let Some(cron) = &task.cron {
            if task.next_run_at.is_none() || task.next_run_at.is_some_and(|t| t < now) {
                task.next_run_at = Self::next_occurrence(cron, now);
            }
        }

        let key = task.id.as_bytes();
        let val = serde_json::to_vec(&task).context("serialize task")?;
        tree.insert(key, val).context("insert task")?;
        tree.flush().ok();
        Ok(task)
    }

    pub fn get_task(&self, id: Uuid) -> Result<Option<ScheduledTask>> {
        let tree = self.tree()?;
        let v = tree.get(id.as_bytes()).context("get task")?;
        let Some(ivec) = v else { return Ok(None) };
        Ok(Some(serde_json::from_slice(&ivec).context("deserialize task")?))
    }

    pub fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let tree = self.tree()?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_k, v) = item.context("iter task")?;
            out.push(serde_json::from_slice::<ScheduledTask>(&v).context("deserialize task")?);
        }
        out.sort_by_key(|t| t.next_run_at);
        Ok(out)
    }

    pub fn cancel_task(&self, id: Uuid) -> Result<bool> {
        let tree = self.tree()?;
        let existed = tree.remove(id.as_bytes()).context("remove task")?.is_some();
        tree.flush().ok();
        Ok(existed)
    }

    pub fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<Option<ScheduledTask>> {
        let Some(mut task) = self.get_task(id)? else { return Ok(None) };
        task.enabled = enabled;
        self.add_task(task.clone())?;
        Ok(Some(task))
    }

    /// Fire every enabled task registered for `event_name`, immediately,
    /// outside the cron tick loop. Used for `resonate/voice-note-uploaded`,
    /// `resonate/profile-rebuilt`, `resonate/account-deleted`.
    pub async fn emit(&self, event_name: &str, tx: &mpsc::Sender<SchedulerEvent>) -> Result<()> {
        let now = Utc::now();
        for task in self.list_tasks()? {
            if !task.enabled {
                continue;
            }
            if task.event_trigger.as_deref() != Some(event_name) {
                continue;
            }
            let _ = tx
                .send(SchedulerEvent::Fired {
                    task_id: task.id,
                    task_name: task.name.clone(),
                    payload: task.payload.clone(),
                    fired_at: now,
                    trigger: TriggerKind::Event(event_name.to_string()),
                })
                .await;
        }
        Ok(())
    }

    /// Start the cron tick loop. Emits [`SchedulerEvent`]s via the returned
    /// receiver; the caller emits event-triggered tasks separately via
    /// [`Scheduler::emit`].
    pub fn start(self, tick_every: Duration) -> Result<(mpsc::Receiver<SchedulerEvent>, JoinHandle<()>)> {
        let (tx, rx) = mpsc::channel::<SchedulerEvent>(64);
        let handle = tokio::spawn(async move {
            if let Ok(events) = self.check_for_misfires() {
                for event in events {
                    let _ = tx.send(event).await;
                }
            }

            let mut interval = tokio::time::interval(
                tick_every
                    .to_std()
                    .unwrap_or_else(|_| std::time::Duration::from_secs(60)),
            );

            loop {
                interval.tick().await;
                let now = Utc::now();

                let tasks = match self.list_tasks() {
                    Ok(t) => t,
                    Err(_) => continue,
                };

                for mut task in tasks.into_iter() {
                    if !task.enabled {
                        continue;
                    }
                    let Some(next_run_at) = task.next_run_at else {
                        continue;
                    };
                    if next_run_at > now {
                        continue;
                    }

                    let _ = tx
                        .send(SchedulerEvent::Fired {
                            task_id: task.id,
                            task_name: task.name.clone(),
                            payload: task.payload.clone(),
                            fired_at: now,
                            trigger: TriggerKind::Cron,
                        })
                        .await;

                    task.last_run_at = Some(now);
                    if let Some(cron) = task.cron.clone() {
                        task.next_run_at = Self::next_occurrence(&cron, now);
                    }
                    let _ = self.add_task(task);
                }
            }
        });

        Ok((rx, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> Scheduler {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        Scheduler::new(Arc::new(db))
    }

    #[test]
    fn add_task_rejects_task_with_no_trigger() {
        let scheduler = open_tmp();
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            name: "orphan".into(),
            cron: None,
            event_trigger: None,
            payload: serde_json::json!({}),
            created_at: Utc::now(),
            next_run_at: None,
            last_run_at: None,
            enabled: true,
        };
        assert!(scheduler.add_task(task).is_err());
    }

    #[test]
    fn cron_task_gets_a_next_run_at() {
        let scheduler = open_tmp();
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            name: "daily_rebuild".into(),
            cron: Some("0 0 3 * * *".into()),
            event_trigger: None,
            payload: serde_json::json!({}),
            created_at: Utc::now(),
            next_run_at: None,
            last_run_at: None,
            enabled: true,
        };
        let saved = scheduler.add_task(task).unwrap();
        assert!(saved.next_run_at.is_some());
    }

    #[tokio::test]
    async fn emit_fires_only_matching_event_triggered_tasks() {
        let scheduler = open_tmp();
        let matching = scheduler
            .add_task(ScheduledTask {
                id: Uuid::new_v4(),
                name: "rebuild_on_voice_note".into(),
                cron: None,
                event_trigger: Some("resonate/voice-note-uploaded".into()),
                payload: serde_json::json!({"kind": "voice"}),
                created_at: Utc::now(),
                next_run_at: None,
                last_run_at: None,
                enabled: true,
            })
            .unwrap();
        scheduler
            .add_task(ScheduledTask {
                id: Uuid::new_v4(),
                name: "unrelated".into(),
                cron: None,
                event_trigger: Some("resonate/account-deleted".into()),
                payload: serde_json::json!({}),
                created_at: Utc::now(),
                next_run_at: None,
                last_run_at: None,
                enabled: true,
            })
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        scheduler.emit("resonate/voice-note-uploaded", &tx).await.unwrap();
        drop(tx);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(received.len(), 1);
        match &received[0] {
            SchedulerEvent::Fired { task_id, .. } => assert_eq!(*task_id, matching.id),
            _ => panic!("expected Fired"),
        }
    }
}
