// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bootstrap wiring: configuration → trust anchors → coordinator, the way a
//! hosting service assembles the agent at startup.

use anyhow::Result;
use ota_agent::{
    AgentReport, CoordinatorBuilder, Facility, HandlerRegistry, SimulatorHandler, State,
    StateReporter, UpdateType,
};
use ota_config::AgentConfig;
use ota_jws::{EnvelopeValidator, JwsError};
use ota_rootkey::RootKeyStore;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct TwinReporter {
    reports: Mutex<Vec<AgentReport>>,
}

impl StateReporter for TwinReporter {
    fn report_state_and_result(&self, report: &AgentReport) -> bool {
        self.reports.lock().unwrap().push(report.clone());
        true
    }
}

#[test]
fn boots_from_config_with_builtin_anchors_and_enforces_trust() -> Result<()> {
    let tmp = tempfile::tempdir()?;

    let config_path = tmp.path().join("agent.toml");
    std::fs::write(
        &config_path,
        format!(
            "[agent]\nmanufacturer = \"contoso\"\nmodel = \"toaster\"\n\n\
             [paths]\ndownloads-folder = {dl:?}\nsource-update-cache = {sdc:?}\n\
             root-key-package = {rk:?}\n",
            dl = tmp.path().join("downloads"),
            sdc = tmp.path().join("sdc"),
            rk = tmp.path().join("rootkeys.json"),
        ),
    )?;
    let config = AgentConfig::load(&config_path)?;

    // No overlay on disk yet: the store degrades to the hardcoded anchors.
    let trust = Arc::new(RootKeyStore::new(&config.paths.root_key_package).load_set());
    assert!(trust.overlay().is_none());

    let mut registry = HandlerRegistry::new();
    registry.register(
        &UpdateType::parse("microsoft/swupdate:1")?,
        Arc::new(SimulatorHandler::succeeding()),
    );

    let reporter = Arc::new(TwinReporter::default());
    let coordinator = CoordinatorBuilder::new(
        config.paths.downloads_folder.clone(),
        Arc::clone(&reporter) as Arc<dyn StateReporter>,
        Arc::new(ota_agent::FsSandboxPlatform) as Arc<dyn ota_agent::PlatformOps>,
        registry,
    )
    .with_trust(Arc::clone(&trust))
    .build();

    // A deployment without a manifest signature cannot pass the trust gate.
    let manifest = serde_json::json!({
        "manifestVersion": "2",
        "updateId": { "provider": "contoso", "name": "toaster", "version": "1.1" },
        "updateType": "microsoft/swupdate:1",
        "files": { "f1": { "fileName": "image.swu" } }
    })
    .to_string();
    let goal = serde_json::json!({
        "workflow": { "id": "boot-1", "action": 3 },
        "updateManifest": manifest
    })
    .to_string();
    coordinator.handle_property_update(&goal, false);

    let last = reporter.reports.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.state, State::Failed);
    assert_eq!(
        Facility::from_erc(last.result.unwrap().extended),
        Some(Facility::Ingress)
    );
    Ok(())
}

#[test]
fn envelope_validator_reports_distinct_trust_failures() -> Result<()> {
    let keys = ota_rootkey::RootKeySet::builtin();
    let validator = EnvelopeValidator::new(&keys);

    // Wrong segment count.
    assert!(matches!(
        validator.validate("only-one-segment"),
        Err(JwsError::BadStructure(_))
    ));

    // Valid structure, unknown root kid inside the signed JWK.
    let b64 = |bytes: &[u8]| ota_crypto::base64url_encode(bytes);
    let sjwk = format!(
        "{}.{}.{}",
        b64(br#"{"alg":"RS256","kid":"OTA.UNKNOWN"}"#),
        b64(br#"{"kty":"RSA","n":"3q2-7w","e":"AQAB"}"#),
        b64(b"bogus-signature"),
    );
    let header = format!(r#"{{"alg":"RS256","sjwk":"{sjwk}"}}"#);
    let envelope = format!(
        "{}.{}.{}",
        b64(header.as_bytes()),
        b64(br#"{"sha256":"AAAA"}"#),
        b64(b"outer-signature"),
    );
    assert!(matches!(
        validator.validate(&envelope),
        Err(JwsError::UnknownKeyId(kid)) if kid == "OTA.UNKNOWN"
    ));
    Ok(())
}
