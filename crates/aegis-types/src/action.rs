//! Emergency side-action kinds and statuses.

use serde::{Deserialize, Serialize};

/// The set of side-actions an incident can trigger. The pair
/// `(IncidentId, ActionKind)` is the idempotency key: one incident runs
/// at most one task per kind, so retried dispatch rounds never start a
/// second siren or recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    Siren,
    LocationShare,
    RecordAudio,
    RecordVideo,
    SendSms,
    FlashlightSos,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Siren => "SIREN",
            ActionKind::LocationShare => "LOCATION_SHARE",
            ActionKind::RecordAudio => "RECORD_AUDIO",
            ActionKind::RecordVideo => "RECORD_VIDEO",
            ActionKind::SendSms => "SEND_SMS",
            ActionKind::FlashlightSos => "FLASHLIGHT_SOS",
        }
    }
}

/// Lifecycle of one action task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Done | ActionStatus::Failed | ActionStatus::Cancelled
        )
    }
}
