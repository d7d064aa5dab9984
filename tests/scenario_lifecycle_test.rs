//! End-to-end scenario lifecycle: start, routed conversation, turn-taking,
//! snapshot/resume, stop, and budget enforcement by the monitor loop.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use common::{harness, seed_two_actor_template, wait_for, Harness};
use dramatis::domain::models::context::StateSnapshot;
use dramatis::domain::models::scenario::{AgentInstance, ScenarioStatus};
use dramatis::domain::ports::event_store::EventStore;
use dramatis::domain::ports::scenario_store::ScenarioStore;
use dramatis::infrastructure::llm::MockLlmClient;
use dramatis::services::scenario_runner::ScenarioError;

async fn role_map(h: &Harness, run_id: Uuid) -> HashMap<String, AgentInstance> {
    h.scenario_store
        .agents_for_run(run_id)
        .await
        .expect("agents")
        .into_iter()
        .map(|a| (a.role_in_scenario.clone(), a))
        .collect()
}

#[tokio::test]
async fn two_actor_conversation_routes_and_rotates_turns() {
    // S1: the initial message lands on primary; primary's output is routed
    // to secondary (and only secondary) as a conversation_message; the turn
    // pointer rotates primary -> secondary -> primary.
    let h = harness(Arc::new(MockLlmClient::new())).await;
    seed_two_actor_template(&h.template_store).await;

    let run_id = h
        .runner
        .start_scenario("two_actor_conversation", None, None)
        .await
        .expect("start scenario");

    let agents = role_map(&h, run_id).await;
    let primary = agents["primary"].id;
    let secondary = agents["secondary"].id;

    // (a) one initial conversation_message targeted at primary
    let initial = wait_for(10, || async {
        let events = h.event_store.list_for_scenario(run_id, 100).await.ok()?;
        events
            .into_iter()
            .find(|e| e.event_type == "conversation_message" && e.target_agent_id == Some(primary))
    })
    .await
    .expect("initial event for primary");
    assert!(initial.source_agent_id.is_none());
    assert_eq!(initial.priority, 5);

    // (b) after primary completes, exactly one routed message reaches
    // secondary, none bounce straight back to primary
    let routed = wait_for(15, || async {
        let events = h.event_store.list_for_scenario(run_id, 100).await.ok()?;
        events.into_iter().find(|e| {
            e.event_type == "conversation_message"
                && e.source_agent_id == Some(primary)
                && e.target_agent_id == Some(secondary)
        })
    })
    .await
    .expect("routed event for secondary");
    assert_eq!(routed.payload["source_role"], "primary");
    assert_eq!(routed.payload["original_event_type"], "actor_speech_generated");

    let events = h
        .event_store
        .list_for_scenario(run_id, 100)
        .await
        .expect("events");
    assert!(
        !events.iter().any(|e| {
            e.source_agent_id == Some(primary) && e.target_agent_id == Some(primary)
        }),
        "primary must not receive its own output"
    );

    // (c) the turn pointer rotates through both actors and back
    wait_for(15, || async {
        let snapshot = h.manager.context_snapshot(run_id).await?;
        (snapshot.turn_history.len() >= 2
            && snapshot.turn_history[0] == primary
            && snapshot.turn_history[1] == secondary)
            .then_some(())
    })
    .await
    .expect("turn rotation primary -> secondary");

    h.runner
        .stop_scenario(run_id, "test_done")
        .await
        .expect("stop");
}

#[tokio::test]
async fn snapshot_then_resume_restores_turn_state() {
    // S4: two turns, snapshot, coordinator dies, resume; the restored
    // context carries the saved turn holder and history.
    // The mock's call budget stalls the conversation after two speeches, so
    // the state is stable across the snapshot/kill/resume window.
    let h = harness(Arc::new(MockLlmClient::failing_after(2))).await;
    seed_two_actor_template(&h.template_store).await;

    let run_id = h
        .runner
        .start_scenario("two_actor_conversation", None, None)
        .await
        .expect("start scenario");
    let agents = role_map(&h, run_id).await;
    let primary = agents["primary"].id;
    let secondary = agents["secondary"].id;

    wait_for(20, || async {
        let snapshot = h.manager.context_snapshot(run_id).await?;
        (snapshot.turn_history.len() == 2).then_some(())
    })
    .await
    .expect("two turns processed");

    h.runner
        .save_state_snapshot(run_id)
        .await
        .expect("snapshot");

    let saved: StateSnapshot = {
        let run = h.scenario_store.get_run(run_id).await.expect("run");
        let raw = run.results.expect("results")["state_snapshot"].clone();
        serde_json::from_value(raw).expect("parse saved snapshot")
    };
    assert_eq!(saved.turn_history, vec![primary, secondary]);
    assert_eq!(saved.current_turn, Some(primary));

    // Coordinator dies: workers stop, context evaporates, run row stays
    // as it was.
    h.manager.stop_scenario(run_id).await;
    assert!(h.manager.context_snapshot(run_id).await.is_none());

    h.runner.resume_scenario(run_id).await.expect("resume");

    let restored = h
        .manager
        .context_snapshot(run_id)
        .await
        .expect("restored context");
    assert_eq!(restored.current_turn, Some(primary));
    assert_eq!(restored.turn_history, vec![primary, secondary]);

    let run = h.scenario_store.get_run(run_id).await.expect("run");
    assert_eq!(run.status, ScenarioStatus::Running);

    h.runner
        .stop_scenario(run_id, "test_done")
        .await
        .expect("stop");
}

#[tokio::test]
async fn stop_terminates_with_reason_and_snapshot() {
    // S5: stopping a running scenario stops routing, terminates with the
    // given reason, and leaves a final snapshot in results.
    let h = harness(Arc::new(MockLlmClient::new())).await;
    seed_two_actor_template(&h.template_store).await;

    let run_id = h
        .runner
        .start_scenario("two_actor_conversation", None, None)
        .await
        .expect("start scenario");

    // Let some events flow first.
    wait_for(15, || async {
        let counts = h.event_store.queue_counts(Some(run_id)).await.ok()?;
        (counts.completed >= 1).then_some(())
    })
    .await
    .expect("some processing happened");

    h.runner.stop_scenario(run_id, "user").await.expect("stop");

    let run = h.scenario_store.get_run(run_id).await.expect("run");
    assert_eq!(run.status, ScenarioStatus::Terminated);
    let results = run.results.expect("results");
    assert_eq!(results["termination_reason"], "user");
    assert!(results.get("state_snapshot").is_some());
    assert!(run.completed_at.is_some());

    // (a) no new events are routed once stopped
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let count_after_stop = h
        .event_store
        .list_for_scenario(run_id, 500)
        .await
        .expect("events")
        .len();
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    let count_later = h
        .event_store
        .list_for_scenario(run_id, 500)
        .await
        .expect("events")
        .len();
    assert_eq!(count_after_stop, count_later);

    // Terminal runs reject further lifecycle operations.
    let again = h.runner.stop_scenario(run_id, "user").await;
    assert!(matches!(again, Err(ScenarioError::InvalidState { .. })));
    let resume = h.runner.resume_scenario(run_id).await;
    assert!(matches!(resume, Err(ScenarioError::InvalidState { .. })));
}

#[tokio::test]
async fn monitor_enforces_max_turns() {
    let h = harness(Arc::new(MockLlmClient::new())).await;
    seed_two_actor_template(&h.template_store).await;

    let config: dramatis::domain::models::template::ScenarioConfig =
        serde_json::from_value(serde_json::json!({ "max_turns": 2 })).expect("config");
    let run_id = h
        .runner
        .start_scenario("two_actor_conversation", Some(config), None)
        .await
        .expect("start scenario");

    wait_for(30, || async {
        let run = h.scenario_store.get_run(run_id).await.ok()?;
        run.is_terminal().then_some(run)
    })
    .await
    .map(|run| {
        assert_eq!(run.status, ScenarioStatus::Terminated);
        let results = run.results.expect("results");
        assert_eq!(results["termination_reason"], "max_turns_reached");
        assert!(run.current_turn_number >= 2);
    })
    .expect("scenario stopped by turn budget");
}

#[tokio::test]
async fn monitor_enforces_timeout() {
    // An always-failing engine makes no progress; the wall clock stops the
    // scenario with reason "timeout".
    let h = harness(Arc::new(MockLlmClient::always_failing())).await;
    seed_two_actor_template(&h.template_store).await;

    let config: dramatis::domain::models::template::ScenarioConfig =
        serde_json::from_value(serde_json::json!({ "timeout_seconds": 2 })).expect("config");
    let run_id = h
        .runner
        .start_scenario("two_actor_conversation", Some(config), None)
        .await
        .expect("start scenario");

    wait_for(20, || async {
        let run = h.scenario_store.get_run(run_id).await.ok()?;
        run.is_terminal().then_some(run)
    })
    .await
    .map(|run| {
        assert_eq!(run.status, ScenarioStatus::Terminated);
        assert_eq!(run.results.expect("results")["termination_reason"], "timeout");
    })
    .expect("scenario stopped by timeout");
}

#[tokio::test]
async fn missing_agent_template_fails_scenario() {
    let h = harness(Arc::new(MockLlmClient::new())).await;
    let mut template = seed_two_actor_template(&h.template_store).await;

    // A second template referencing an agent template that does not exist.
    use dramatis::domain::models::engine::EngineType;
    use dramatis::domain::models::template::RoleSpec;
    use dramatis::domain::ports::template_store::TemplateStore;
    template.id = Uuid::new_v4();
    template.name = "broken_scenario".into();
    template.agent_roles.insert(
        "ghost".into(),
        RoleSpec {
            template_name: "no_such_template".into(),
            engine_type: EngineType::Actor,
            required: true,
            config: Value::Null,
        },
    );
    h.template_store
        .insert_scenario_template(&template)
        .await
        .expect("insert broken template");

    let result = h.runner.start_scenario("broken_scenario", None, None).await;
    assert!(matches!(
        result,
        Err(ScenarioError::AgentTemplateNotFound(name)) if name == "no_such_template"
    ));

    // The materialization failure left the run marked failed.
    let runs = h
        .scenario_store
        .list_runs(Some(ScenarioStatus::Failed), 10)
        .await
        .expect("list");
    assert_eq!(runs.len(), 1);
    assert!(runs[0].results.as_ref().expect("results")["failure_reason"]
        .as_str()
        .expect("reason")
        .contains("no_such_template"));
}

#[tokio::test]
async fn unknown_template_is_rejected() {
    let h = harness(Arc::new(MockLlmClient::new())).await;
    let result = h.runner.start_scenario("does_not_exist", None, None).await;
    assert!(matches!(result, Err(ScenarioError::TemplateNotFound(_))));
}

#[tokio::test]
async fn corrupt_snapshot_refuses_resume() {
    let h = harness(Arc::new(MockLlmClient::failing_after(0))).await;
    seed_two_actor_template(&h.template_store).await;

    let run_id = h
        .runner
        .start_scenario("two_actor_conversation", None, None)
        .await
        .expect("start scenario");
    h.manager.stop_scenario(run_id).await;

    // Corrupt the stored snapshot by hand.
    let mut run = h.scenario_store.get_run(run_id).await.expect("run");
    run.results = Some(serde_json::json!({
        "state_snapshot": {"turn_history": "definitely-not-a-list"}
    }));
    h.scenario_store.update_run(&run).await.expect("update");

    let result = h.runner.resume_scenario(run_id).await;
    assert!(matches!(result, Err(ScenarioError::CorruptSnapshot(_))));
    // The run was left untouched, not failed.
    let run = h.scenario_store.get_run(run_id).await.expect("run");
    assert_eq!(run.status, ScenarioStatus::Running);
    assert!(!h.manager.is_registered(run_id).await);
}

#[tokio::test]
async fn event_sequence_dispatches_in_order() {
    let h = harness(Arc::new(MockLlmClient::new())).await;
    seed_two_actor_template(&h.template_store).await;
    let run_id = h
        .runner
        .start_scenario("two_actor_conversation", None, None)
        .await
        .expect("start scenario");
    let agents = role_map(&h, run_id).await;
    let primary = agents["primary"].id;

    let sequence: Vec<dramatis::services::SequenceEvent> = serde_json::from_value(
        serde_json::json!([
            {"event_type": "conversation_message", "data": {"content": "first"}, "target_agent_id": primary},
            {"event_type": "conversation_message", "data": {"content": "second"}, "target_agent_id": primary}
        ]),
    )
    .expect("sequence");

    let results = h
        .runner
        .run_scenario_sequence(run_id, sequence)
        .await
        .expect("sequence dispatched");
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r["success"] == true));

    // Targeting an agent that is not part of the scenario is a not-found.
    let stranger = Uuid::new_v4();
    let bad_target = h
        .runner
        .send_event_to_scenario(run_id, "conversation_message", Value::Null, Some(stranger))
        .await;
    assert!(matches!(
        bad_target,
        Err(ScenarioError::AgentNotFound(id)) if id == stranger
    ));

    h.runner
        .stop_scenario(run_id, "test_done")
        .await
        .expect("stop");

    // Events cannot be sent into a terminated scenario.
    let rejected = h
        .runner
        .send_event_to_scenario(run_id, "conversation_message", Value::Null, None)
        .await;
    assert!(matches!(rejected, Err(ScenarioError::InvalidState { .. })));
}

#[tokio::test]
async fn monitor_report_includes_queue_counts() {
    let h = harness(Arc::new(MockLlmClient::new())).await;
    seed_two_actor_template(&h.template_store).await;
    let run_id = h
        .runner
        .start_scenario("two_actor_conversation", None, None)
        .await
        .expect("start scenario");

    let report = h.runner.monitor_scenario(run_id).await.expect("monitor");
    assert_eq!(report.id, run_id);
    assert_eq!(report.status, ScenarioStatus::Running);
    assert!(report.is_active);
    assert!(report.state.is_some());

    h.runner
        .stop_scenario(run_id, "test_done")
        .await
        .expect("stop");

    let report = h.runner.monitor_scenario(run_id).await.expect("monitor");
    assert!(!report.is_active);
    assert_eq!(report.status, ScenarioStatus::Terminated);
}
