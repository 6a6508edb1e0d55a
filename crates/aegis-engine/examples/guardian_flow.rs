//! End-to-end walkthrough: a user's risk signals climb, an incident
//! opens, a guardian acknowledges, and the evidence timeline is printed.
//!
//! Run with `RUST_LOG=info cargo run -p aegis-engine --example guardian_flow`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use aegis_directory::Guardian;
use aegis_engine::{Collaborators, SafetyEngine};
use aegis_ledger::ExportScope;
use aegis_types::{
    ActionKind, ActionRunner, AlertTransport, CollaboratorError, EngineConfig, GeoPoint,
    GuardianAlert, GuardianId, IncidentId, Telephony, TextGenerator, UserId,
};

struct ConsoleTransport;

#[async_trait]
impl AlertTransport for ConsoleTransport {
    async fn send_alert(&self, alert: &GuardianAlert) -> Result<(), CollaboratorError> {
        println!(
            "  -> alert {} round {} to {} ({}, {:.4},{:.4})",
            alert.incident,
            alert.round,
            alert.guardian,
            alert.level.as_str(),
            alert.location.lat,
            alert.location.lon
        );
        Ok(())
    }
}

struct ConsoleTelephony;

#[async_trait]
impl Telephony for ConsoleTelephony {
    async fn dial(&self, number: &str) -> Result<(), CollaboratorError> {
        println!("  -> dialing {number}");
        Ok(())
    }

    async fn send_sms(&self, recipients: &[String], body: &str) -> Result<(), CollaboratorError> {
        println!("  -> SMS to {recipients:?}: {body}");
        Ok(())
    }
}

struct CannedText;

#[async_trait]
impl TextGenerator for CannedText {
    async fn generate(
        &self,
        _system_context: &str,
        _user_message: &str,
    ) -> Result<String, CollaboratorError> {
        Ok("Move to a well-lit public place and keep your phone in hand.".to_string())
    }
}

struct InstantRunner;

#[async_trait]
impl ActionRunner for InstantRunner {
    async fn run(
        &self,
        _incident: &IncidentId,
        kind: ActionKind,
        _cancel: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), CollaboratorError> {
        println!("  -> action {} running", kind.as_str());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let engine = SafetyEngine::new(
        EngineConfig::default(),
        Collaborators {
            text: Arc::new(CannedText),
            telephony: Arc::new(ConsoleTelephony),
            transport: Arc::new(ConsoleTransport),
            runner: Arc::new(InstantRunner),
        },
    );

    let origin = GeoPoint::new(28.7041, 77.1025);
    for (id, north_meters) in [("asha", 120.0), ("meera", 300.0), ("ravi", 450.0)] {
        engine.directory().register(Guardian::new(
            GuardianId::new(id),
            GeoPoint::new(origin.lat + north_meters / 111_320.0, origin.lon),
        ))?;
    }

    let user = UserId::new("priya");
    println!("feeding risk signals...");
    let mut incident = None;
    for signal in [20.0, 25.0, 35.0, 40.0, 65.0, 70.0, 80.0, 85.0, 85.0] {
        let report = engine.sample_signal(&user, signal, origin).await?;
        println!(
            "  signal {signal:>5.1} -> score {:.2} level {}",
            report.state.score,
            report.state.level.as_str()
        );
        incident = incident.or(report.opened);
    }

    let incident = incident.expect("the signal ramp should open an incident");
    println!("incident opened: {incident}");

    println!("guidance: {}", engine.guidance("I think someone is following me").await?);

    engine.ack(incident, GuardianId::new("asha")).await?;
    engine.resolve(incident).await?;

    engine.verify_evidence(incident)?;
    let export = engine.export_evidence(incident, ExportScope::SelfView)?;
    println!("{}", export.timeline());
    Ok(())
}
