use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, watch};

use aegis_ledger::{EntryKind, LedgerWriter};
use aegis_types::{
    ActionConfig, ActionKind, ActionRunner, ActionStatus, ActionTaskId, EngineEvent, IncidentId,
};

/// Caller-facing view of one action task.
#[derive(Clone, Debug)]
pub struct ActionHandle {
    pub id: ActionTaskId,
    pub incident: IncidentId,
    pub kind: ActionKind,
    status: watch::Receiver<ActionStatus>,
}

impl ActionHandle {
    pub fn status(&self) -> ActionStatus {
        *self.status.borrow()
    }

    /// Wait until the task reaches DONE, FAILED, or CANCELLED.
    pub async fn wait_terminal(&mut self) -> ActionStatus {
        loop {
            let status = *self.status.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if self.status.changed().await.is_err() {
                return *self.status.borrow();
            }
        }
    }
}

struct TaskEntry {
    id: ActionTaskId,
    status: watch::Receiver<ActionStatus>,
    cancel: watch::Sender<bool>,
}

/// Drives side-action tasks and reports their transitions into the
/// evidence ledger.
pub struct ActionOrchestrator {
    tasks: Mutex<HashMap<(IncidentId, ActionKind), TaskEntry>>,
    ledger: Arc<dyn LedgerWriter>,
    runner: Arc<dyn ActionRunner>,
    events: broadcast::Sender<EngineEvent>,
    cfg: ActionConfig,
}

impl ActionOrchestrator {
    pub fn new(
        cfg: ActionConfig,
        ledger: Arc<dyn LedgerWriter>,
        runner: Arc<dyn ActionRunner>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            ledger,
            runner,
            events,
            cfg,
        }
    }

    /// Start `kind` for `incident`, or return the existing task if one
    /// was already started. The returned handle carries the same task
    /// id either way.
    pub fn start(&self, incident: IncidentId, kind: ActionKind) -> ActionHandle {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(entry) = tasks.get(&(incident, kind)) {
            return ActionHandle {
                id: entry.id,
                incident,
                kind,
                status: entry.status.clone(),
            };
        }

        let id = ActionTaskId::generate();
        let (status_tx, status_rx) = watch::channel(ActionStatus::Pending);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tasks.insert(
            (incident, kind),
            TaskEntry {
                id,
                status: status_rx.clone(),
                cancel: cancel_tx,
            },
        );

        tokio::spawn(drive_task(
            id,
            incident,
            kind,
            self.cfg.clone(),
            Arc::clone(&self.ledger),
            Arc::clone(&self.runner),
            self.events.clone(),
            status_tx,
            cancel_rx,
        ));

        ActionHandle {
            id,
            incident,
            kind,
            status: status_rx,
        }
    }

    /// Existing task for `(incident, kind)`, if any.
    pub fn get(&self, incident: IncidentId, kind: ActionKind) -> Option<ActionHandle> {
        let tasks = self.tasks.lock().ok()?;
        tasks.get(&(incident, kind)).map(|entry| ActionHandle {
            id: entry.id,
            incident,
            kind,
            status: entry.status.clone(),
        })
    }

    /// Request cooperative cancellation of every non-terminal task for
    /// `incident`. Running tasks observe the flag at their next safe
    /// checkpoint; nothing is force-killed. Returns the kinds that
    /// were still live when the request arrived.
    pub fn cancel_all(&self, incident: IncidentId) -> Vec<ActionKind> {
        let tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut cancelled = Vec::new();
        for ((task_incident, kind), entry) in tasks.iter() {
            if *task_incident != incident || entry.status.borrow().is_terminal() {
                continue;
            }
            let _ = entry.cancel.send(true);
            cancelled.push(*kind);
        }
        cancelled.sort();
        cancelled
    }

    /// Current status of every task started for `incident`.
    pub fn statuses(&self, incident: IncidentId) -> Vec<(ActionKind, ActionStatus)> {
        let tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out: Vec<_> = tasks
            .iter()
            .filter(|((task_incident, _), _)| *task_incident == incident)
            .map(|((_, kind), entry)| (*kind, *entry.status.borrow()))
            .collect();
        out.sort_by_key(|(kind, _)| *kind);
        out
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive_task(
    id: ActionTaskId,
    incident: IncidentId,
    kind: ActionKind,
    cfg: ActionConfig,
    ledger: Arc<dyn LedgerWriter>,
    runner: Arc<dyn ActionRunner>,
    events: broadcast::Sender<EngineEvent>,
    status: watch::Sender<ActionStatus>,
    cancel: watch::Receiver<bool>,
) {
    if *cancel.borrow() {
        let _ = status.send(ActionStatus::Cancelled);
        return;
    }

    let _ = status.send(ActionStatus::Running);
    if let Err(error) = ledger.append(
        incident,
        EntryKind::ActionStarted,
        json!({ "task": id.to_string(), "kind": kind.as_str() }),
    ) {
        tracing::warn!(%incident, kind = kind.as_str(), %error, "failed to record action start");
    }

    let mut attempts = 0u32;
    loop {
        let result = runner.run(&incident, kind, cancel.clone()).await;

        if *cancel.borrow() {
            tracing::info!(%incident, kind = kind.as_str(), "action cancelled");
            let _ = status.send(ActionStatus::Cancelled);
            return;
        }

        match result {
            Ok(()) => {
                let _ = status.send(ActionStatus::Done);
                if let Err(error) = ledger.append(
                    incident,
                    EntryKind::ActionCompleted,
                    json!({ "task": id.to_string(), "kind": kind.as_str() }),
                ) {
                    tracing::warn!(%incident, kind = kind.as_str(), %error, "failed to record action completion");
                }
                return;
            }
            Err(error) if attempts < cfg.max_retries => {
                attempts += 1;
                tracing::warn!(
                    %incident,
                    kind = kind.as_str(),
                    attempt = attempts,
                    %error,
                    "action failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(cfg.retry_backoff_ms)).await;
            }
            Err(error) => {
                tracing::error!(%incident, kind = kind.as_str(), %error, "action failed permanently");
                let _ = status.send(ActionStatus::Failed);
                if let Err(ledger_error) = ledger.append(
                    incident,
                    EntryKind::ActionFailed,
                    json!({
                        "task": id.to_string(),
                        "kind": kind.as_str(),
                        "reason": error.to_string(),
                        "retries": attempts,
                    }),
                ) {
                    tracing::warn!(%incident, %ledger_error, "failed to record action failure");
                }
                let _ = events.send(EngineEvent::ActionFailed {
                    incident,
                    kind,
                    reason: error.to_string(),
                });
                return;
            }
        }
    }
}
