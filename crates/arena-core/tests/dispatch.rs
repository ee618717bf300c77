//! Dispatch scenarios against a scripted backend

use arena_core::{Arena, ExperimentDispatcher, ExperimentOptions, ModelId};
use arena_test_utils::{config_for, fresh_store, Script, ScriptedBackend};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

fn ids(names: &[&str]) -> Vec<ModelId> {
    names.iter().map(|n| ModelId::from(*n)).collect()
}

#[tokio::test]
async fn one_model_times_out_others_still_return() {
    let backend = ScriptedBackend::new()
        .with("fast", Script::reply("Quick answer.", 5, 7))
        .with("steady", Script::delayed(Duration::from_millis(30), "Steady answer.", 5, 9))
        .with("stuck", Script::Hang)
        .into_arc();
    let config = config_for(&["fast", "steady", "stuck"], Duration::from_secs(5));
    let dispatcher = ExperimentDispatcher::new(backend.clone(), config.roster())
        .with_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let run = dispatcher
        .run("p", &config.model_ids(), &ExperimentOptions::default())
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(run.len(), 3);
    assert!(run.get("fast").unwrap().is_success());
    assert_eq!(run.get("steady").unwrap().text, "Steady answer.");

    let stuck = run.get("stuck").unwrap();
    assert_eq!(stuck.failure.as_deref(), Some("request timed out after 0.2s"));
    assert_eq!(stuck.total_tokens, 0);
    assert_eq!(backend.calls_to("stuck"), 1);
}

#[tokio::test]
async fn calls_run_concurrently() {
    let delay = Duration::from_millis(150);
    let backend = ScriptedBackend::new()
        .with("a", Script::delayed(delay, "a", 1, 1))
        .with("b", Script::delayed(delay, "b", 1, 1))
        .with("c", Script::delayed(delay, "c", 1, 1))
        .into_arc();
    let config = config_for(&["a", "b", "c"], Duration::from_secs(5));
    let dispatcher = ExperimentDispatcher::new(backend, config.roster());

    let started = Instant::now();
    let run = dispatcher
        .run("p", &config.model_ids(), &ExperimentOptions::default())
        .await;

    assert!(started.elapsed() < delay * 3);
    assert!(run.iter().all(|(_, r)| r.is_success()));
    assert!(run.iter().all(|(_, r)| r.elapsed_seconds >= 0.1));
}

#[tokio::test]
async fn key_set_matches_configured_ids_in_order() {
    let backend = ScriptedBackend::new()
        .with("x", Script::transport_error("reset"))
        .with("y", Script::Panic("boom".into()))
        .into_arc();
    let dispatcher = ExperimentDispatcher::new(backend, Default::default());

    let run = dispatcher
        .run("p", &ids(&["y", "x", "unscripted", "x"]), &ExperimentOptions::default())
        .await;

    let keys: Vec<&str> = run.models().map(ModelId::as_str).collect();
    assert_eq!(keys, vec!["y", "x", "unscripted"]);
    assert!(run.iter().all(|(_, r)| !r.is_success()));
    assert_eq!(
        run.get("unscripted").unwrap().failure.as_deref(),
        Some("request rejected: unknown model unscripted")
    );
    assert_eq!(
        run.get("y").unwrap().failure.as_deref(),
        Some("backend call panicked: boom")
    );
}

#[tokio::test]
async fn system_prompt_reaches_every_backend_first() {
    let backend = ScriptedBackend::new()
        .with("a", Script::reply("ok", 1, 1))
        .with("b", Script::reply("ok", 1, 1))
        .into_arc();
    let config = config_for(&["a", "b"], Duration::from_secs(5));
    let arena = Arena::new(&config, backend.clone(), fresh_store(&config.achievements));

    let options = ExperimentOptions::default()
        .with_system_prompt("You are terse")
        .with_temperature(1.1)
        .with_max_tokens(77);
    arena.run_experiment("Summarise Rust", options).await.unwrap();

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    for request in requests {
        assert_eq!(request.system_prompt(), Some("You are terse"));
        assert_eq!(request.prompt(), "Summarise Rust");
        assert_eq!(request.temperature, 1.1);
        assert_eq!(request.max_tokens, 77);
    }
}

#[tokio::test]
async fn failed_run_still_counts_toward_progression() {
    let backend = ScriptedBackend::new()
        .with("a", Script::transport_error("down"))
        .into_arc();
    let config = config_for(&["a"], Duration::from_secs(5));
    let arena = Arena::new(&config, backend, fresh_store(&config.achievements));

    let outcome = arena.run_default("anyone there?").await.unwrap();

    assert_eq!(outcome.run.summary().failed, 1);
    assert_eq!(outcome.progression.xp, 25);
    let unlocked: Vec<&str> = outcome
        .progression
        .unlocked
        .iter()
        .map(|a| a.id.as_str())
        .collect();
    assert_eq!(unlocked, vec!["first-experiment"]);
}

#[tokio::test]
async fn overflowing_token_counts_fail_only_that_model() {
    let backend = ScriptedBackend::new()
        .with("huge", Script::reply("ok", u64::MAX, 1))
        .with("fine", Script::reply("Fine answer.", 3, 4))
        .into_arc();
    let config = config_for(&["huge", "fine"], Duration::from_secs(5));
    let arena = Arena::new(&config, backend, fresh_store(&config.achievements));

    let outcome = arena.run_default("count carefully").await.unwrap();
    let run = outcome.run;

    assert_eq!(run.len(), 2);
    assert_eq!(run.get("fine").unwrap().total_tokens, 7);
    let huge = run.get("huge").unwrap();
    assert!(huge
        .failure
        .as_deref()
        .unwrap()
        .starts_with("malformed provider response:"));
    assert_eq!(huge.total_tokens, 0);
    assert_eq!(run.total_tokens(), 7);
    assert_eq!(
        arena.store().snapshot().achievements["token-master"].progress,
        7
    );
}

#[tokio::test]
async fn empty_configured_system_prompt_sends_no_system_turn() {
    let backend = ScriptedBackend::new()
        .with("a", Script::reply("ok", 1, 1))
        .into_arc();
    let config = config_for(&["a"], Duration::from_secs(5))
        .with_default_options(ExperimentOptions::default().with_system_prompt(""));
    let arena = Arena::new(&config, backend.clone(), fresh_store(&config.achievements));

    arena.run_default("Just the prompt").await.unwrap();

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[0].system_prompt(), None);
}
