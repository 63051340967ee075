//! Delegation and supervisor tests
//!
//! Sub-runs execute on their own checkpoint threads; these tests check that
//! pauses, failures and outputs cross the delegation boundary intact.

use futures::StreamExt;
use rungraph_checkpoint::{
    CheckpointSaver, CheckpointStatus, FailureKind, InMemoryCheckpointSaver, State,
};
use rungraph_core::{
    Agent, DelegateStep, EngineConfig, ErrorKind, Event, GraphError, MergePolicy, RouterFuture,
    RunCoordinator, StepOutput, StepRegistry, Supervisor, SupervisorDecision,
    NEXT_AGENT_CHANNEL,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn coordinator(registry: StepRegistry) -> (RunCoordinator, Arc<InMemoryCheckpointSaver>) {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let config = Arc::new(EngineConfig::default());
    let coordinator = RunCoordinator::new(registry, saver.clone(), config);
    (coordinator, saver)
}

/// Child graph asking a human before approving
fn approver() -> StepRegistry {
    let mut builder = StepRegistry::builder("approver");
    builder
        .add_channel("log", MergePolicy::Append)
        .add_step("ask", |ctx| {
            Box::pin(async move {
                match ctx.resume_value() {
                    Some(answer) => {
                        Ok(StepOutput::goto(["record"]).set("approved", answer.clone()))
                    }
                    None => {
                        let draft = ctx.get("draft").cloned().unwrap_or(Value::Null);
                        Ok(StepOutput::pause(json!({ "approve": draft })))
                    }
                }
            })
        })
        .add_step("record", |_ctx| {
            Box::pin(async move {
                Ok(StepOutput::stop().set("log", json!(["approval recorded"])))
            })
        });
    builder.compile().unwrap()
}

fn publisher(child: StepRegistry) -> StepRegistry {
    let mut builder = StepRegistry::builder("publisher");
    builder
        .add_channel("log", MergePolicy::Append)
        .add_step("plan", |_ctx| {
            Box::pin(async move {
                Ok(StepOutput::goto(["review"])
                    .set("draft", json!("release notes"))
                    .set("log", json!(["planned"])))
            })
        })
        .add_step_with(
            "review",
            DelegateStep::new(child).with_output_channels(["approved", "log"]),
        )
        .add_step("publish", |ctx| {
            Box::pin(async move {
                let published = ctx.get("approved") == Some(&json!("yes"));
                Ok(StepOutput::stop().set("published", json!(published)))
            })
        })
        .add_edge("review", "publish");
    builder.compile().unwrap()
}

/// Test a pause inside a sub-run pauses the parent and resumes through it
#[tokio::test]
async fn test_delegation_pause_and_resume() {
    let (coordinator, saver) = coordinator(publisher(approver()));

    let paused = coordinator.invoke("t1", Value::Null).await.unwrap();
    assert!(paused.is_paused());
    let interrupt = paused.pending_interrupt.as_ref().unwrap();
    assert_eq!(interrupt.step, "review");
    assert_eq!(interrupt.payload, json!({"approve": "release notes"}));

    let child = saver.latest("t1/review").await.unwrap().unwrap();
    assert!(child.is_paused());
    assert_eq!(child.sequence, 0);

    let done = coordinator.resume("t1", json!("yes")).await.unwrap();
    assert_eq!(done.status(), CheckpointStatus::Completed);
    assert_eq!(done.state["approved"], json!("yes"));
    assert_eq!(done.state["published"], json!(true));
    assert_eq!(done.state["log"], json!(["planned", "approval recorded"]));

    let child = saver.latest("t1/review").await.unwrap().unwrap();
    assert_eq!(child.status(), CheckpointStatus::Completed);
    assert_eq!(saver.history("t1/review").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_sub_run_events_are_qualified() {
    let (coordinator, _saver) = coordinator(publisher(approver()));

    let events: Vec<Event> = coordinator
        .stream("t1", Value::Null)
        .await
        .unwrap()
        .collect()
        .await;

    let steps: Vec<&str> = events.iter().filter_map(Event::step).collect();
    assert_eq!(
        steps,
        vec![
            "plan",
            "plan",
            "review",
            "review/ask",
            "review/ask",
            "review",
            "review"
        ]
    );
    assert!(matches!(events.last(), Some(Event::Interrupt { step, .. }) if step == "review"));

    let events: Vec<Event> = coordinator
        .resume_stream("t1", json!("no"))
        .await
        .unwrap()
        .collect()
        .await;
    assert!(events.contains(&Event::StepEnd {
        step: "review/record".to_string(),
        result: Some(json!({"log": ["approval recorded"]})),
    }));
    assert!(events.contains(&Event::StepEnd {
        step: "publish".to_string(),
        result: Some(json!({"published": false})),
    }));
}

#[tokio::test]
async fn test_sub_run_failure_fails_delegating_step() {
    let mut broken = StepRegistry::builder("broken");
    broken.add_step("explode", |_ctx| {
        Box::pin(async move { Err("tool crashed".into()) })
    });

    let mut parent = StepRegistry::builder("parent");
    parent
        .add_step("start", |_ctx| {
            Box::pin(async move { Ok(StepOutput::goto(["delegate"]).set("started", json!(true))) })
        })
        .add_step_with("delegate", DelegateStep::new(broken.compile().unwrap()));
    let (coordinator, saver) = coordinator(parent.compile().unwrap());

    let err = coordinator.invoke("t1", Value::Null).await.unwrap_err();
    match err {
        GraphError::StepExecution { step, error } => {
            assert_eq!(step, "delegate");
            assert!(error.contains("tool crashed"), "{}", error);
        }
        other => panic!("expected step failure, got {other}"),
    }

    let failed = coordinator.state("t1").await.unwrap().unwrap();
    assert!(failed.is_failed());
    assert_eq!(failed.state["started"], json!(true));
    assert!(saver.latest("t1/delegate").await.unwrap().unwrap().is_failed());
}

/// Test a sub-run hitting the superstep cap fails the parent as runaway
#[tokio::test]
async fn test_sub_run_runaway_fails_parent_as_runaway() {
    let mut looping = StepRegistry::builder("looping");
    looping.add_step("spin", |_ctx| {
        Box::pin(async move { Ok(StepOutput::goto(["spin"])) })
    });

    let mut parent = StepRegistry::builder("parent");
    parent
        .add_step("start", |_ctx| {
            Box::pin(async move { Ok(StepOutput::goto(["delegate"]).set("started", json!(true))) })
        })
        .add_step_with("delegate", DelegateStep::new(looping.compile().unwrap()));
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let config = Arc::new(EngineConfig::default().with_max_supersteps(3));
    let coordinator = RunCoordinator::new(parent.compile().unwrap(), saver.clone(), config);

    let err = coordinator.invoke("t1", Value::Null).await.unwrap_err();
    assert!(matches!(err, GraphError::RunawayExecution { limit: 3 }), "{}", err);

    let failed = coordinator.state("t1").await.unwrap().unwrap();
    assert!(failed.is_failed());
    assert_eq!(failed.sequence, 1);
    assert_eq!(failed.state["started"], json!(true));
    assert_eq!(failed.error.as_ref().unwrap().kind, FailureKind::RunawayExecution);

    let child = saver.latest("t1/delegate").await.unwrap().unwrap();
    assert_eq!(child.error.as_ref().unwrap().kind, FailureKind::RunawayExecution);
    assert_eq!(child.sequence, 3);

    let events: Vec<Event> = coordinator
        .stream("t2", Value::Null)
        .await
        .unwrap()
        .collect()
        .await;
    match events.last() {
        Some(Event::Error { kind, .. }) => assert_eq!(*kind, ErrorKind::RunawayExecution),
        other => panic!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sub_run_starts_from_input_channels_only() {
    let mut child = StepRegistry::builder("child");
    child.add_step("inspect", |ctx| {
        Box::pin(async move {
            let seen: Vec<String> = ctx.state().keys().cloned().collect();
            Ok(StepOutput::stop().set("seen", json!(seen)))
        })
    });

    let mut parent = StepRegistry::builder("parent");
    parent
        .add_step("start", |_ctx| {
            Box::pin(async move {
                Ok(StepOutput::goto(["delegate"])
                    .set("question", json!("why?"))
                    .set("secret", json!("hunter2")))
            })
        })
        .add_step_with(
            "delegate",
            DelegateStep::new(child.compile().unwrap()).with_input_channels(["question"]),
        );
    let (coordinator, _saver) = coordinator(parent.compile().unwrap());

    let done = coordinator.invoke("t1", Value::Null).await.unwrap();
    assert_eq!(done.state["seen"], json!(["question"]));
    assert_eq!(done.state["secret"], json!("hunter2"));
}

fn worker(name: &str, channel: &'static str, message: &'static str) -> StepRegistry {
    let mut builder = StepRegistry::builder(name);
    builder
        .add_channel("messages", MergePolicy::Append)
        .add_step("work", move |_ctx| {
            Box::pin(async move {
                Ok(StepOutput::stop()
                    .set(channel, json!(message))
                    .set("messages", json!([message])))
            })
        });
    builder.compile().unwrap()
}

fn research_router(state: State) -> RouterFuture {
    Box::pin(async move {
        Ok(if state.contains_key("notes") {
            SupervisorDecision::Finish
        } else {
            SupervisorDecision::delegate("searcher")
        })
    })
}

fn root_router(state: State) -> RouterFuture {
    Box::pin(async move {
        Ok(if !state.contains_key("notes") {
            SupervisorDecision::delegate("research_team")
        } else if !state.contains_key("report") {
            SupervisorDecision::delegate("writer")
        } else {
            SupervisorDecision::Finish
        })
    })
}

/// Test a supervisor whose member is itself a supervisor
#[tokio::test]
async fn test_hierarchical_supervisor() {
    let research_team = Supervisor::new("research_team", research_router)
        .with_member(worker("searcher", "notes", "searcher: found sources"));
    let root = Supervisor::new("root", root_router)
        .with_member(Agent::Supervisor(research_team))
        .with_member(worker("writer", "report", "writer: drafted report"));
    let registry = Agent::Supervisor(root).compile().unwrap();
    let (coordinator, saver) = coordinator(registry);

    let events: Vec<Event> = coordinator
        .stream("t1", json!("topic: rust"))
        .await
        .unwrap()
        .collect()
        .await;
    assert!(events.iter().any(|e| e.step() == Some("research_team/searcher/work")));
    assert!(!events.iter().any(Event::is_terminal));

    let done = coordinator.state("t1").await.unwrap().unwrap();
    assert_eq!(done.status(), CheckpointStatus::Completed);
    assert_eq!(done.state["notes"], json!("searcher: found sources"));
    assert_eq!(done.state["report"], json!("writer: drafted report"));
    assert_eq!(
        done.state["messages"],
        json!(["searcher: found sources", "writer: drafted report"])
    );
    assert_eq!(done.state[NEXT_AGENT_CHANNEL], Value::Null);

    let path: Vec<Value> = coordinator
        .history("t1")
        .await
        .unwrap()
        .iter()
        .filter_map(|c| c.state.get(NEXT_AGENT_CHANNEL).cloned())
        .collect();
    assert_eq!(
        path,
        vec![
            json!("research_team"),
            json!("research_team"),
            json!("writer"),
            json!("writer"),
            Value::Null
        ]
    );

    let grandchild = saver.latest("t1/research_team/searcher").await.unwrap().unwrap();
    assert_eq!(grandchild.state["notes"], json!("searcher: found sources"));
    assert_eq!(grandchild.state["input"], json!("topic: rust"));
}

#[tokio::test]
async fn test_router_choosing_unknown_member_fails() {
    let supervisor = Supervisor::new("team", |_state| {
        Box::pin(async move { Ok(SupervisorDecision::delegate("ghost")) })
    })
    .with_member(worker("writer", "report", "done"));
    let (coordinator, _saver) = coordinator(supervisor.compile().unwrap());

    let err = coordinator.invoke("t1", Value::Null).await.unwrap_err();
    assert!(matches!(err, GraphError::StepExecution { ref step, .. } if step == "supervisor"));
}

#[tokio::test]
async fn test_delete_removes_sub_threads() {
    let (coordinator, saver) = coordinator(publisher(approver()));
    coordinator.invoke("t1", Value::Null).await.unwrap();
    coordinator.resume("t1", json!("yes")).await.unwrap();
    assert_eq!(saver.thread_count().await, 2);

    assert!(coordinator.delete_thread("t1").await.unwrap());
    assert_eq!(saver.thread_count().await, 0);
}
