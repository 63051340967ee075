//! Demo agents bundled with the CLI

use clap::ValueEnum;
use rungraph_checkpoint::Namespace;
use rungraph_core::{
    Agent, MergePolicy, Result, RouterFuture, State, StepContext, StepFuture, StepOutput,
    StepRegistry, StepResult, Supervisor, SupervisorDecision,
};
use serde_json::{json, Value};

/// Memory namespace of published drafts
pub const POSTS: &str = "posts";

/// Agents the `rungraph` binary can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoAgent {
    /// Drafts a post from the input and waits for a human to approve it
    Approval,
    /// Supervisor delegating to a research agent, then a writer
    Supervisor,
}

impl DemoAgent {
    pub fn build(self) -> Result<StepRegistry> {
        match self {
            DemoAgent::Approval => approval(),
            DemoAgent::Supervisor => supervisor(),
        }
    }
}

fn topic(ctx: &StepContext) -> String {
    match ctx.get("input") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "untitled".to_string(),
    }
}

fn is_approval(value: &Value) -> bool {
    match value {
        Value::Bool(approved) => *approved,
        Value::String(answer) => {
            matches!(answer.to_lowercase().as_str(), "y" | "yes" | "approve")
        }
        _ => false,
    }
}

/// `draft` -> `review` (pauses) -> `publish`
pub fn approval() -> Result<StepRegistry> {
    let mut builder = StepRegistry::builder("approval");
    builder
        .add_channel("log", MergePolicy::Append)
        .add_step("draft", draft)
        .add_step("review", review)
        .add_step("publish", publish)
        .add_edge("draft", "review");
    builder.compile()
}

fn draft(ctx: StepContext) -> StepFuture {
    Box::pin(async move {
        let text = format!("A short post about {}", topic(&ctx));
        for word in text.split_inclusive(' ') {
            ctx.emit_token(word);
        }
        Ok(StepOutput::next()
            .set("draft", json!(text))
            .set("log", json!(["drafted"])))
    })
}

fn review(ctx: StepContext) -> StepFuture {
    Box::pin(async move {
        let Some(answer) = ctx.resume_value() else {
            let draft = ctx.get("draft").cloned().unwrap_or(Value::Null);
            return Ok(StepOutput::pause(json!({
                "question": "Publish this draft?",
                "draft": draft,
            })));
        };

        if is_approval(answer) {
            Ok(StepOutput::goto(["publish"]).set("log", json!(["approved"])))
        } else {
            Ok(StepOutput::stop()
                .set("status", json!("rejected"))
                .set("log", json!(["rejected"])))
        }
    })
}

fn publish(ctx: StepContext) -> StepFuture {
    Box::pin(publish_post(ctx))
}

/// Published drafts are kept in the memory store under `posts`, keyed by thread.
async fn publish_post(ctx: StepContext) -> StepResult {
    if let Some(store) = ctx.store() {
        let draft = ctx.get("draft").cloned().unwrap_or(Value::Null);
        store
            .put(&Namespace::from(POSTS), ctx.thread_id(), json!({"draft": draft}))
            .await?;
    }
    ctx.emit_custom(json!({"published_to": "blog"}));
    Ok(StepOutput::stop()
        .set("status", json!("published"))
        .set("log", json!(["published"])))
}

/// Supervisor over a two-step research agent and a writer
pub fn supervisor() -> Result<StepRegistry> {
    let mut research = StepRegistry::builder("research");
    research
        .add_channel("messages", MergePolicy::Append)
        .add_step("search", |ctx| {
            Box::pin(async move {
                let topic = topic(&ctx);
                ctx.emit_custom(json!({"query": topic}));
                let sources = json!([format!("{} handbook", topic), format!("{} blog", topic)]);
                Ok(StepOutput::goto(["summarize"]).set("sources", sources))
            })
        })
        .add_step("summarize", |ctx| {
            Box::pin(async move {
                let count = ctx.get("sources").and_then(Value::as_array).map_or(0, Vec::len);
                let notes = format!("{} sources reviewed", count);
                Ok(StepOutput::stop()
                    .set("messages", json!([format!("research: {}", notes)]))
                    .set("notes", json!(notes)))
            })
        });

    let mut writer = StepRegistry::builder("writer");
    writer
        .add_channel("messages", MergePolicy::Append)
        .add_step("write", |ctx| {
            Box::pin(async move {
                let notes = ctx
                    .get("notes")
                    .and_then(Value::as_str)
                    .unwrap_or("no notes")
                    .to_string();
                let report = format!("Report on {} ({})", topic(&ctx), notes);
                for word in report.split_inclusive(' ') {
                    ctx.emit_token(word);
                }
                Ok(StepOutput::stop()
                    .set("messages", json!(["writer: report drafted"]))
                    .set("report", json!(report)))
            })
        });

    let team = Supervisor::new("team", route)
        .with_member(research.compile()?)
        .with_member(writer.compile()?);
    Agent::Supervisor(team).compile()
}

fn route(state: State) -> RouterFuture {
    Box::pin(async move {
        Ok(if !state.contains_key("notes") {
            SupervisorDecision::delegate("research")
        } else if !state.contains_key("report") {
            SupervisorDecision::delegate("writer")
        } else {
            SupervisorDecision::Finish
        })
    })
}
