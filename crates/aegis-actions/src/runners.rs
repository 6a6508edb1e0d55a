use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use aegis_types::{ActionKind, ActionRunner, CollaboratorError, IncidentId, Telephony};

/// Runner that succeeds immediately. Useful for kinds the host device
/// treats as fire-and-forget, and as the default in tests.
pub struct NoopRunner;

#[async_trait]
impl ActionRunner for NoopRunner {
    async fn run(
        &self,
        _incident: &IncidentId,
        _kind: ActionKind,
        _cancel: watch::Receiver<bool>,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Routes SMS actions through the telephony collaborator and delegates
/// every other kind to an inner runner.
pub struct TelephonyRunner {
    telephony: Arc<dyn Telephony>,
    fallback: Arc<dyn ActionRunner>,
    recipients: Vec<String>,
    body: String,
}

impl TelephonyRunner {
    pub fn new(
        telephony: Arc<dyn Telephony>,
        fallback: Arc<dyn ActionRunner>,
        recipients: Vec<String>,
        body: String,
    ) -> Self {
        Self {
            telephony,
            fallback,
            recipients,
            body,
        }
    }
}

#[async_trait]
impl ActionRunner for TelephonyRunner {
    async fn run(
        &self,
        incident: &IncidentId,
        kind: ActionKind,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), CollaboratorError> {
        match kind {
            ActionKind::SendSms => {
                if self.recipients.is_empty() {
                    return Err(CollaboratorError::Rejected(
                        "no SMS recipients configured".to_string(),
                    ));
                }
                tracing::info!(%incident, recipients = self.recipients.len(), "sending alert SMS");
                self.telephony.send_sms(&self.recipients, &self.body).await
            }
            _ => self.fallback.run(incident, kind, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingTelephony {
        sent: Mutex<Vec<(Vec<String>, String)>>,
    }

    #[async_trait]
    impl Telephony for RecordingTelephony {
        async fn dial(&self, _number: &str) -> Result<(), CollaboratorError> {
            Ok(())
        }

        async fn send_sms(
            &self,
            recipients: &[String],
            body: &str,
        ) -> Result<(), CollaboratorError> {
            self.sent
                .lock()
                .unwrap()
                .push((recipients.to_vec(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn sms_actions_go_through_telephony() {
        let telephony = Arc::new(RecordingTelephony {
            sent: Mutex::new(Vec::new()),
        });
        let runner = TelephonyRunner::new(
            telephony.clone(),
            Arc::new(NoopRunner),
            vec!["+911234567890".to_string()],
            "I need help. Tracking my location.".to_string(),
        );
        let (_tx, cancel) = watch::channel(false);

        runner
            .run(&IncidentId::generate(), ActionKind::SendSms, cancel)
            .await
            .unwrap();

        let sent = telephony.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec!["+911234567890".to_string()]);
    }

    #[tokio::test]
    async fn non_sms_kinds_fall_through() {
        let telephony = Arc::new(RecordingTelephony {
            sent: Mutex::new(Vec::new()),
        });
        let runner = TelephonyRunner::new(
            telephony.clone(),
            Arc::new(NoopRunner),
            vec!["+911234567890".to_string()],
            String::new(),
        );
        let (_tx, cancel) = watch::channel(false);

        runner
            .run(&IncidentId::generate(), ActionKind::Siren, cancel)
            .await
            .unwrap();

        assert!(telephony.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sms_without_recipients_is_rejected() {
        let telephony = Arc::new(RecordingTelephony {
            sent: Mutex::new(Vec::new()),
        });
        let runner = TelephonyRunner::new(
            telephony,
            Arc::new(NoopRunner),
            Vec::new(),
            String::new(),
        );
        let (_tx, cancel) = watch::channel(false);

        let err = runner
            .run(&IncidentId::generate(), ActionKind::SendSms, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected(_)));
    }
}
