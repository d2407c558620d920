//! End-to-end exercises of the dispatch pipeline against scripted
//! validators: candidate filtering, failover, counters, accounting, and
//! health-probe interaction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use pix_gateway::{
    AccountingError, ApiKeyLedger, AttemptOutcome, ClientError, DispatchConfig, DispatchError,
    Dispatcher, HealthMonitor, StakeSnapshot, StakeView, UsageAccountant, ValidatorClient,
    ValidatorRegistry,
};
use pix_persist::PersistError;
use pix_proto::{ForwardRequest, ValidatorId};
use serde_json::{Value, json};

#[derive(Clone)]
enum ForwardScript {
    Ok(Value),
    Status(u16),
    Transport,
}

/// Validator transport with scripted behavior per endpoint.
#[derive(Default)]
struct ScriptedClient {
    forwards: Mutex<HashMap<String, ForwardScript>>,
    probes: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn script_forward(&self, endpoint: &str, script: ForwardScript) {
        self.forwards.lock().insert(endpoint.to_string(), script);
    }

    fn script_probe(&self, endpoint: &str, alive: bool) {
        self.probes.lock().insert(endpoint.to_string(), alive);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl ValidatorClient for ScriptedClient {
    async fn forward(
        &self,
        endpoint: &str,
        _request: &ForwardRequest,
    ) -> Result<Value, ClientError> {
        self.calls.lock().push(endpoint.to_string());
        match self.forwards.lock().get(endpoint).cloned() {
            Some(ForwardScript::Ok(body)) => Ok(body),
            Some(ForwardScript::Status(code)) => Err(ClientError::Status(code)),
            Some(ForwardScript::Transport) | None => {
                Err(ClientError::Transport("scripted failure".into()))
            }
        }
    }

    async fn probe(&self, endpoint: &str, _request: &ForwardRequest) -> Result<(), ClientError> {
        match self.probes.lock().get(endpoint).copied() {
            Some(true) => Ok(()),
            Some(false) => Err(ClientError::Status(500)),
            None => Err(ClientError::Transport("unreachable".into())),
        }
    }
}

/// Accountant that records every call it receives.
#[derive(Default)]
struct CountingAccountant {
    attempts: Mutex<Vec<(String, AttemptOutcome)>>,
}

impl UsageAccountant for CountingAccountant {
    fn record_attempt(
        &self,
        client_key: &str,
        outcome: &AttemptOutcome,
    ) -> Result<(), AccountingError> {
        self.attempts
            .lock()
            .push((client_key.to_string(), outcome.clone()));
        Ok(())
    }
}

/// Accountant whose every record attempt fails to persist.
struct BrokenAccountant;

impl UsageAccountant for BrokenAccountant {
    fn record_attempt(
        &self,
        _client_key: &str,
        _outcome: &AttemptOutcome,
    ) -> Result<(), AccountingError> {
        let bad_json = serde_json::from_str::<Value>("{").expect_err("malformed");
        Err(AccountingError::Persist(PersistError::Serialize(bad_json)))
    }
}

fn id(s: &str) -> ValidatorId {
    ValidatorId::from(s)
}

fn endpoint(s: &str) -> String {
    format!("http://{s}")
}

/// Registry + stake view with one entry per `(name, stake)`.
fn pool(entries: &[(&str, f64)]) -> (Arc<ValidatorRegistry>, StakeView) {
    let registry = Arc::new(ValidatorRegistry::new());
    let mut members = Vec::new();
    for (name, stake) in entries {
        registry.register(id(name), endpoint(name));
        members.push((id(name), *stake));
    }
    (registry, StakeView::new(StakeSnapshot::new(members)))
}

fn dispatcher(
    registry: Arc<ValidatorRegistry>,
    stake: StakeView,
    client: Arc<ScriptedClient>,
    accountant: Arc<CountingAccountant>,
) -> Dispatcher<Arc<ScriptedClient>, Arc<CountingAccountant>> {
    Dispatcher::new(
        registry,
        stake,
        client,
        accountant,
        "cHVia2V5".to_string(),
        DispatchConfig::default(),
    )
}

#[tokio::test]
async fn empty_pool_fails_fast_without_network_calls() {
    let (registry, stake) = pool(&[]);
    let client = Arc::new(ScriptedClient::default());
    let accountant = Arc::new(CountingAccountant::default());
    let dispatcher = dispatcher(registry, stake, Arc::clone(&client), accountant);

    let result = dispatcher.dispatch("key", json!({"prompt": "x"}), "sdxl").await;

    assert!(matches!(result, Err(DispatchError::NoValidatorsAvailable)));
    assert!(client.calls().is_empty(), "no network call may be made");
}

#[tokio::test]
async fn inactive_and_non_member_validators_are_not_candidates() {
    let (registry, stake) = pool(&[("w1", 5.0)]);
    // w2 is registered but absent from the stake membership.
    registry.register(id("w2"), endpoint("w2"));
    // w1 is a member but currently inactive.
    registry.mark_active(&id("w1"), false);

    let client = Arc::new(ScriptedClient::default());
    let accountant = Arc::new(CountingAccountant::default());
    let dispatcher = dispatcher(registry, stake, Arc::clone(&client), accountant);

    let result = dispatcher.dispatch("key", json!({}), "sdxl").await;

    assert!(matches!(result, Err(DispatchError::NoValidatorsAvailable)));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn every_candidate_is_attempted_exactly_once_when_all_fail() {
    let (registry, stake) = pool(&[("w1", 3.0), ("w2", 2.0), ("w3", 1.0)]);
    let client = Arc::new(ScriptedClient::default());
    for name in ["w1", "w2", "w3"] {
        client.script_forward(&endpoint(name), ForwardScript::Transport);
    }
    let accountant = Arc::new(CountingAccountant::default());
    let dispatcher = dispatcher(
        Arc::clone(&registry),
        stake,
        Arc::clone(&client),
        accountant,
    );

    let result = dispatcher.dispatch("key", json!({}), "sdxl").await;

    assert!(matches!(
        result,
        Err(DispatchError::AllValidatorsFailed { attempted: 3 })
    ));

    let mut calls = client.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![endpoint("w1"), endpoint("w2"), endpoint("w3")],
        "each validator tried exactly once"
    );

    let today = Utc::now().date_naive();
    for name in ["w1", "w2", "w3"] {
        let counter = registry.get(&id(name)).expect("record").counter_for(today);
        assert_eq!(counter.failure, 1, "{name} failure counter");
        assert_eq!(counter.success, 0, "{name} success counter");
    }
}

#[tokio::test]
async fn failover_returns_first_success_and_records_both_outcomes() {
    // w1 carries nearly all the stake so it is drawn first in practice,
    // fails, and the dispatch falls over to w2.
    let (registry, stake) = pool(&[("w1", 1_000_000.0), ("w2", 0.0)]);
    let client = Arc::new(ScriptedClient::default());
    client.script_forward(&endpoint("w1"), ForwardScript::Status(500));
    client.script_forward(&endpoint("w2"), ForwardScript::Ok(json!({"image": "abc"})));

    let accountant = Arc::new(CountingAccountant::default());
    let dispatcher = dispatcher(
        Arc::clone(&registry),
        stake,
        Arc::clone(&client),
        Arc::clone(&accountant),
    );

    let body = dispatcher
        .dispatch("key", json!({"prompt": "a fox"}), "sdxl")
        .await
        .expect("second validator succeeds");

    assert_eq!(body, json!({"image": "abc"}));
    assert_eq!(client.calls(), vec![endpoint("w1"), endpoint("w2")]);

    let today = Utc::now().date_naive();
    assert_eq!(registry.get(&id("w1")).expect("w1").counter_for(today).failure, 1);
    assert_eq!(registry.get(&id("w2")).expect("w2").counter_for(today).success, 1);

    let attempts = accountant.attempts.lock();
    assert_eq!(attempts.len(), 2, "accountant sees every attempt");
    assert!(attempts.iter().all(|(key, _)| key == "key"));
    assert!(!attempts[0].1.success);
    assert!(attempts[1].1.success);
}

#[tokio::test]
async fn failed_probe_excludes_validator_until_it_recovers() {
    let (registry, stake) = pool(&[("w1", 5.0), ("w2", 5.0)]);
    let client = Arc::new(ScriptedClient::default());
    client.script_forward(&endpoint("w1"), ForwardScript::Ok(json!({"image": "w1"})));
    client.script_forward(&endpoint("w2"), ForwardScript::Ok(json!({"image": "w2"})));
    client.script_probe(&endpoint("w1"), false);
    client.script_probe(&endpoint("w2"), true);

    let monitor = HealthMonitor::new(
        Arc::clone(&registry),
        Arc::clone(&client),
        Duration::from_secs(300),
        "cHVia2V5".to_string(),
    );

    monitor.sweep().await;
    assert!(!registry.get(&id("w1")).expect("w1").active);

    let accountant = Arc::new(CountingAccountant::default());
    let dispatcher = dispatcher(
        Arc::clone(&registry),
        stake,
        Arc::clone(&client),
        accountant,
    );

    let body = dispatcher.dispatch("key", json!({}), "sdxl").await.expect("dispatch");
    assert_eq!(body, json!({"image": "w2"}), "only w2 was a candidate");
    assert_eq!(client.calls(), vec![endpoint("w2")]);

    // w1 recovers on the next sweep and is eligible again.
    client.script_probe(&endpoint("w1"), true);
    monitor.sweep().await;
    assert!(registry.get(&id("w1")).expect("w1").active);
    assert_eq!(registry.snapshot_active().len(), 2);
}

#[tokio::test]
async fn accounting_failure_never_fails_the_request() {
    let (registry, stake) = pool(&[("w1", 5.0)]);
    let client = Arc::new(ScriptedClient::default());
    client.script_forward(&endpoint("w1"), ForwardScript::Ok(json!({"image": "abc"})));

    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        stake,
        Arc::clone(&client),
        BrokenAccountant,
        "cHVia2V5".to_string(),
        DispatchConfig::default(),
    );

    let body = dispatcher
        .dispatch("key", json!({"prompt": "a fox"}), "sdxl")
        .await
        .expect("broken accounting must not fail the dispatch");

    assert_eq!(body, json!({"image": "abc"}));
    let today = Utc::now().date_naive();
    let counter = registry.get(&id("w1")).expect("w1").counter_for(today);
    assert_eq!(counter.success, 1, "outcome still recorded");
}

#[tokio::test]
async fn ledger_accounts_attempts_and_spends_credit_on_success_only() {
    let (registry, stake) = pool(&[("w1", 1_000_000.0), ("w2", 0.0)]);
    let client = Arc::new(ScriptedClient::default());
    client.script_forward(&endpoint("w1"), ForwardScript::Transport);
    client.script_forward(&endpoint("w2"), ForwardScript::Ok(json!({"image": "abc"})));

    let ledger = Arc::new(ApiKeyLedger::new());
    ledger.grant("alice", 10);

    let dispatcher = Dispatcher::new(
        registry,
        stake,
        Arc::clone(&client),
        Arc::clone(&ledger),
        "cHVia2V5".to_string(),
        DispatchConfig::default(),
    );

    dispatcher
        .dispatch("alice", json!({}), "sdxl")
        .await
        .expect("dispatch");

    let usage = ledger.usage("alice").expect("usage");
    assert_eq!(usage.request_count, 2, "both attempts counted");
    assert_eq!(usage.success_count, 1);
    assert_eq!(usage.credits, 9, "one credit per successful generation");
}
