use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use triage::conversation::{ConversationState, Role};
use triage::dispatch::{Stage, TransitionEntry, TransitionTable};
use triage::engine::Engine;
use triage::engine::pipeline::{Pipeline, PipelineError, Termination};
use triage::events::{Event, EventBus};
use triage::routing::Directive;
use triage::stage::react::{ReactStage, StageConfig};
use triage::stage::{StageExecutor, StageResult};
use triage::thinker::mock::MockThinker;
use triage::thinker::{Context, Step, StepResult, Thinker, TokenUsage, ToolCall};
use triage::tools::ToolRegistry;
use triage::tools::shell::{ShellConfig, ShellMode, ShellTool};

fn react(stage: Stage, thinker: impl Thinker + 'static) -> Arc<dyn StageExecutor> {
    react_with(stage, thinker, StageConfig::default())
}

fn react_with(stage: Stage, thinker: impl Thinker + 'static, config: StageConfig) -> Arc<dyn StageExecutor> {
    Arc::new(ReactStage::new(stage, Box::new(thinker), Arc::new(ToolRegistry::new()), config))
}

/// A pipeline whose stages answer from the given scripts, one answer per run.
fn scripted(router: &[&str], researcher: &[&str], static_: &[&str], dynamic: &[&str]) -> Pipeline {
    Pipeline::builder()
        .stage(react(Stage::Router, MockThinker::answers(router.iter().copied())))
        .stage(react(Stage::Researcher, MockThinker::answers(researcher.iter().copied())))
        .stage(react(Stage::Static, MockThinker::answers(static_.iter().copied())))
        .stage(react(Stage::Dynamic, MockThinker::answers(dynamic.iter().copied())))
        .build()
        .unwrap()
}

/// Sleeps before finishing, to exercise stage timeouts.
struct SlowThinker(Duration);

#[async_trait]
impl Thinker for SlowThinker {
    async fn next_step(&self, _context: &Context) -> Result<StepResult> {
        tokio::time::sleep(self.0).await;
        Ok(StepResult {
            step: Step::Finish {
                thought: String::new(),
                answer: "too late".to_string(),
            },
            usage: None,
        })
    }
}

/// Never finishes; records whether it was torn down.
struct StuckStage {
    stage: Stage,
    torn_down: Arc<AtomicBool>,
}

#[async_trait]
impl StageExecutor for StuckStage {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn run(&self, _conversation: &ConversationState, _last_user_message: &str) -> StageResult {
        std::future::pending().await
    }

    async fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }
}

/// Routes on the user's words, so one instance can serve many sessions.
struct KeywordRouter;

#[async_trait]
impl StageExecutor for KeywordRouter {
    fn stage(&self) -> Stage {
        Stage::Router
    }

    async fn run(&self, conversation: &ConversationState, last_user_message: &str) -> StageResult {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let route = if last_user_message.contains("binary") {
            "Static"
        } else {
            "Dynamic"
        };
        let reply = format!("turn {} goes to {}", conversation.turn_count(), route);
        StageResult::completed(reply, format!("next: {}", route), TokenUsage::default())
    }
}

/// Replies with the last user message.
struct Echo(Stage);

#[async_trait]
impl StageExecutor for Echo {
    fn stage(&self) -> Stage {
        self.0
    }

    async fn run(&self, _conversation: &ConversationState, last_user_message: &str) -> StageResult {
        StageResult::completed(
            format!("{}: {}", self.0, last_user_message),
            "",
            TokenUsage::default(),
        )
    }
}

#[tokio::test]
async fn router_end_is_a_single_hop() {
    let mut pipeline = scripted(&["Hello! next: End"], &[], &[], &[]);

    let report = pipeline.run_turn("hi").await;
    assert_eq!(report.reply, "Hello! next: End");
    assert_eq!(report.hops, vec![Stage::Router]);
    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(pipeline.state().messages().len(), 2);
    assert_eq!(pipeline.state().current_directive(), Some(Directive::End));
}

#[tokio::test]
async fn router_to_static_then_end() {
    let mut pipeline = scripted(&["Looks like a binary.\nnext: Static"], &[], &["strings found"], &[]);

    let report = pipeline.run_turn("analyze the binary").await;
    assert_eq!(report.hops, vec![Stage::Router, Stage::Static]);
    assert_eq!(report.reply, "strings found");
    assert_eq!(report.termination, Termination::Completed);

    let messages = pipeline.state().messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].content, "Looks like a binary.\nnext: Static");
    assert_eq!(messages[2].content, "strings found");
}

#[tokio::test]
async fn router_to_dynamic_then_end() {
    let mut pipeline = scripted(&["next: Dynamic"], &[], &[], &["port 80 open"]);

    let report = pipeline.run_turn("scan the host").await;
    assert_eq!(report.hops, vec![Stage::Router, Stage::Dynamic]);
    assert_eq!(report.reply, "port 80 open");
}

#[tokio::test]
async fn researcher_loops_back_to_router() {
    let mut pipeline = scripted(
        &["I need context. next: Researcher", "Now I know.\nnext: Static"],
        &["CVE-2021-44228 is log4shell"],
        &["patched version found"],
        &[],
    );

    let report = pipeline.run_turn("is this jar vulnerable?").await;
    assert_eq!(
        report.hops,
        vec![Stage::Router, Stage::Researcher, Stage::Router, Stage::Static]
    );
    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(pipeline.state().research_loops(), 1);
    assert_eq!(pipeline.state().messages().len(), 1 + 4);
}

#[tokio::test]
async fn keyword_fallback_routes_without_next_line() {
    let mut pipeline = scripted(&["This calls for Dynamic analysis."], &[], &[], &["ran it"]);

    let report = pipeline.run_turn("run it").await;
    assert_eq!(report.hops, vec![Stage::Router, Stage::Dynamic]);
}

#[tokio::test]
async fn reply_without_route_ends_the_turn() {
    let mut pipeline = scripted(&["I am not sure what to do."], &[], &[], &[]);

    let report = pipeline.run_turn("hmm").await;
    assert_eq!(report.hops, vec![Stage::Router]);
    assert_eq!(report.termination, Termination::Completed);
}

#[tokio::test]
async fn loop_guard_stops_endless_research() {
    let mut pipeline = Pipeline::builder()
        .stage(react(
            Stage::Router,
            MockThinker::answers(["next: Researcher", "next: Researcher", "still unsure\nnext: Researcher"]),
        ))
        .stage(react(Stage::Researcher, MockThinker::answers(["r1", "r2"])))
        .stage(react(Stage::Static, MockThinker::answers(Vec::<String>::new())))
        .stage(react(Stage::Dynamic, MockThinker::answers(Vec::<String>::new())))
        .max_research_loops(2)
        .build()
        .unwrap();

    let report = pipeline.run_turn("loop forever").await;
    assert_eq!(report.termination, Termination::LoopGuard { limit: 2 });
    assert_eq!(report.hops.len(), 5);
    assert!(report.reply.starts_with("still unsure"));
    assert!(report.reply.contains("limit of 2 research rounds"));
    assert_eq!(pipeline.state().messages().len(), 1 + 5);
    assert_eq!(pipeline.state().research_loops(), 2);
}

#[tokio::test]
async fn loop_counter_resets_every_turn() {
    let mut pipeline = Pipeline::builder()
        .stage(react(
            Stage::Router,
            MockThinker::answers(["next: Researcher", "next: End", "next: Researcher", "next: End"]),
        ))
        .stage(react(Stage::Researcher, MockThinker::answers(["first", "second"])))
        .stage(react(Stage::Static, MockThinker::answers(Vec::<String>::new())))
        .stage(react(Stage::Dynamic, MockThinker::answers(Vec::<String>::new())))
        .max_research_loops(1)
        .build()
        .unwrap();

    let first = pipeline.run_turn("one").await;
    let second = pipeline.run_turn("two").await;

    assert_eq!(first.termination, Termination::Completed);
    assert_eq!(second.termination, Termination::Completed);
    assert_eq!(second.hops, vec![Stage::Router, Stage::Researcher, Stage::Router]);
    assert_eq!(pipeline.state().turn_count(), 2);
    assert_eq!(pipeline.state().messages().len(), 8);
}

#[tokio::test]
async fn failing_stage_degrades_and_ends() {
    // No scripted steps: the thinker errors on its first call.
    let mut pipeline = scripted(&[], &[], &[], &[]);

    let report = pipeline.run_turn("anything").await;
    assert_eq!(report.hops, vec![Stage::Router]);
    assert_eq!(report.termination, Termination::Completed);
    assert!(report.reply.starts_with("The router stage could not finish"));
    assert_eq!(pipeline.state().messages().len(), 2);
}

#[tokio::test]
async fn stage_timeout_degrades_and_ends() {
    let config = StageConfig {
        stage_timeout: Duration::from_millis(50),
        ..StageConfig::default()
    };
    let mut pipeline = Pipeline::builder()
        .stage(react(Stage::Router, MockThinker::answers(["next: Static"])))
        .stage(react(Stage::Researcher, MockThinker::answers(Vec::<String>::new())))
        .stage(react_with(Stage::Static, SlowThinker(Duration::from_secs(5)), config))
        .stage(react(Stage::Dynamic, MockThinker::answers(Vec::<String>::new())))
        .build()
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(2), pipeline.run_turn("slow"))
        .await
        .expect("stage timeout should bound the turn");
    assert_eq!(report.hops, vec![Stage::Router, Stage::Static]);
    assert!(report.reply.contains("timed out"));
    assert_eq!(report.termination, Termination::Completed);
}

#[tokio::test]
async fn abort_stops_in_flight_stage_without_committing() {
    let torn_down = Arc::new(AtomicBool::new(false));
    let mut pipeline = Pipeline::builder()
        .stage(react(Stage::Router, MockThinker::answers(["next: Static"])))
        .stage(react(Stage::Researcher, MockThinker::answers(Vec::<String>::new())))
        .stage(Arc::new(StuckStage {
            stage: Stage::Static,
            torn_down: Arc::clone(&torn_down),
        }))
        .stage(react(Stage::Dynamic, MockThinker::answers(Vec::<String>::new())))
        .build()
        .unwrap();

    let handle = pipeline.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
    });

    let report = pipeline.run_turn("hang").await;
    assert_eq!(report.termination, Termination::Aborted { stage: Stage::Static });
    assert_eq!(report.hops, vec![Stage::Router]);
    assert_eq!(report.reply, "next: Static");
    assert!(torn_down.load(Ordering::SeqCst));

    // User message plus the router's reply; nothing from the aborted stage.
    assert_eq!(pipeline.state().messages().len(), 2);
}

#[tokio::test]
async fn abort_before_a_turn_does_not_leak_into_it() {
    let mut pipeline = scripted(&["next: End"], &[], &[], &[]);
    pipeline.abort_handle().abort();

    let report = pipeline.run_turn("hello").await;
    assert_eq!(report.termination, Termination::Completed);
}

#[tokio::test]
async fn sessions_share_executors_but_not_state() {
    let router: Arc<dyn StageExecutor> = Arc::new(KeywordRouter);
    let static_: Arc<dyn StageExecutor> = Arc::new(Echo(Stage::Static));
    let dynamic: Arc<dyn StageExecutor> = Arc::new(Echo(Stage::Dynamic));
    let researcher: Arc<dyn StageExecutor> = Arc::new(Echo(Stage::Researcher));

    let build = || {
        Pipeline::builder()
            .stage(Arc::clone(&router))
            .stage(Arc::clone(&researcher))
            .stage(Arc::clone(&static_))
            .stage(Arc::clone(&dynamic))
            .build()
            .unwrap()
    };
    let mut a = build();
    let mut b = build();

    let (ra, rb) = tokio::join!(a.run_turn("look at this binary"), b.run_turn("poke the server"));

    assert_eq!(ra.hops, vec![Stage::Router, Stage::Static]);
    assert_eq!(rb.hops, vec![Stage::Router, Stage::Dynamic]);
    assert_eq!(ra.reply, "static: look at this binary");
    assert_eq!(rb.reply, "dynamic: poke the server");
    assert_eq!(a.state().messages().len(), 3);
    assert_eq!(b.state().messages().len(), 3);
    assert_eq!(a.state().messages()[0].content, "look at this binary");
    assert_eq!(b.state().messages()[0].content, "poke the server");
}

#[tokio::test]
async fn events_follow_the_turn() {
    let events = Arc::new(EventBus::default());
    let mut rx = events.subscribe();
    let mut pipeline = Pipeline::builder()
        .stage(react(Stage::Router, MockThinker::answers(["next: Static"])))
        .stage(react(Stage::Researcher, MockThinker::answers(Vec::<String>::new())))
        .stage(react(Stage::Static, MockThinker::answers(["done"])))
        .stage(react(Stage::Dynamic, MockThinker::answers(Vec::<String>::new())))
        .events(Arc::clone(&events))
        .build()
        .unwrap();

    pipeline.run_turn("go").await;

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            Event::StageStarted { stage: Stage::Router },
            Event::StageCompleted {
                stage: Stage::Router,
                directive: Directive::Static,
                next: Stage::Static,
            },
            Event::StageStarted { stage: Stage::Static },
            Event::StageCompleted {
                stage: Stage::Static,
                directive: Directive::End,
                next: Stage::End,
            },
        ]
    );
}

#[tokio::test]
async fn tool_calls_stay_private_but_are_reported() {
    let events = Arc::new(EventBus::default());
    let mut rx = events.subscribe();
    let router = ReactStage::new(
        Stage::Router,
        Box::new(MockThinker::from_steps(vec![
            Step::Act {
                thought: "look it up".to_string(),
                calls: vec![ToolCall {
                    tool: "missing".to_string(),
                    args: HashMap::new(),
                }],
            },
            Step::Finish {
                thought: "nothing found".to_string(),
                answer: "next: End".to_string(),
            },
        ])),
        Arc::new(ToolRegistry::new()),
        StageConfig::default(),
    )
    .with_events(Arc::clone(&events));

    let mut pipeline = Pipeline::builder()
        .stage(Arc::new(router))
        .stage(react(Stage::Researcher, MockThinker::answers(Vec::<String>::new())))
        .stage(react(Stage::Static, MockThinker::answers(Vec::<String>::new())))
        .stage(react(Stage::Dynamic, MockThinker::answers(Vec::<String>::new())))
        .events(Arc::clone(&events))
        .build()
        .unwrap();

    let report = pipeline.run_turn("check").await;
    assert_eq!(report.reply, "next: End");
    assert_eq!(pipeline.state().messages().len(), 2);

    let mut tool_events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::ToolCalled { tool, ok, .. } = event {
            tool_events.push((tool, ok));
        }
    }
    assert_eq!(tool_events, vec![("missing".to_string(), false)]);
}

#[tokio::test]
async fn usage_accumulates_across_turns() {
    let step = |answer: &str| StepResult {
        step: Step::Finish {
            thought: String::new(),
            answer: answer.to_string(),
        },
        usage: Some(TokenUsage {
            input_tokens: 100,
            output_tokens: 10,
        }),
    };
    let mut pipeline = Pipeline::builder()
        .stage(react(Stage::Router, MockThinker::new(vec![step("next: End"), step("next: End")])))
        .stage(react(Stage::Researcher, MockThinker::answers(Vec::<String>::new())))
        .stage(react(Stage::Static, MockThinker::answers(Vec::<String>::new())))
        .stage(react(Stage::Dynamic, MockThinker::answers(Vec::<String>::new())))
        .build()
        .unwrap();

    let first = pipeline.run_turn("a").await;
    pipeline.run_turn("b").await;

    assert_eq!(first.usage.total(), 110);
    assert_eq!(pipeline.session_usage().total(), 220);
}

#[test]
fn blocking_turn_from_sync_code() {
    let mut pipeline = scripted(&["next: Static"], &[], &["sync works"], &[]);

    let report = pipeline.run_turn_blocking("from a plain thread").unwrap();
    assert_eq!(report.reply, "sync works");
    assert_eq!(pipeline.state().messages().len(), 3);
}

#[tokio::test]
async fn pipeline_as_engine() {
    let mut engine: Box<dyn Engine> = Box::new(scripted(&["Hi there. next: End"], &[], &[], &[]));
    assert_eq!(engine.run("hello").await.unwrap(), "Hi there. next: End");
}

#[tokio::test]
async fn reset_clears_the_conversation() {
    let mut pipeline = scripted(&["next: End", "next: End"], &[], &[], &[]);
    pipeline.run_turn("first").await;
    pipeline.reset();

    pipeline.run_turn("second").await;
    assert_eq!(pipeline.state().turn_count(), 1);
    assert_eq!(pipeline.state().messages().len(), 2);
}

#[test]
fn build_requires_executors_for_reachable_stages() {
    let err = Pipeline::builder()
        .stage(react(Stage::Router, MockThinker::answers(["next: End"])))
        .build()
        .err();
    assert!(matches!(err, Some(PipelineError::MissingExecutor(Stage::Researcher))));
}

#[tokio::test]
async fn custom_table_chains_static_into_dynamic() {
    let table = TransitionTable::new()
        .with(Stage::Start, TransitionEntry::unconditional(Stage::Static))
        .with(Stage::Static, TransitionEntry::unconditional(Stage::Dynamic))
        .with(Stage::Dynamic, TransitionEntry::unconditional(Stage::End));

    // Only reachable stages need executors.
    let mut pipeline = Pipeline::builder()
        .table(table)
        .stage(Arc::new(Echo(Stage::Static)))
        .stage(Arc::new(Echo(Stage::Dynamic)))
        .build()
        .unwrap();

    let report = pipeline.run_turn("sample.exe").await;
    assert_eq!(report.hops, vec![Stage::Static, Stage::Dynamic]);
    assert_eq!(report.reply, "dynamic: sample.exe");
}

#[tokio::test]
async fn swapped_thinker_routes_the_next_turn() {
    let router = Arc::new(ReactStage::new(
        Stage::Router,
        Box::new(MockThinker::answers(["next: End"])),
        Arc::new(ToolRegistry::new()),
        StageConfig::default(),
    ));
    let mut pipeline = Pipeline::builder()
        .stage(Arc::clone(&router) as Arc<dyn StageExecutor>)
        .stage(react(Stage::Researcher, MockThinker::answers(Vec::<String>::new())))
        .stage(react(Stage::Static, MockThinker::answers(["reviewed"])))
        .stage(react(Stage::Dynamic, MockThinker::answers(Vec::<String>::new())))
        .build()
        .unwrap();

    let first = pipeline.run_turn("hello").await;
    assert_eq!(first.hops, vec![Stage::Router]);

    router
        .set_thinker(Box::new(MockThinker::answers(["next: Static"])))
        .await;

    let second = pipeline.run_turn("review main.c").await;
    assert_eq!(second.hops, vec![Stage::Router, Stage::Static]);
    assert_eq!(second.reply, "reviewed");
}

#[tokio::test]
async fn abort_kills_running_shell_command() {
    let dir = tempfile::tempdir().unwrap();
    let tools = Arc::new(ToolRegistry::new());
    tools
        .register(Arc::new(ShellTool::new(ShellConfig {
            mode: ShellMode::ReadWrite,
            working_dir: dir.path().to_path_buf(),
            require_confirmation: false,
            ..ShellConfig::default()
        })))
        .await;
    let dynamic = ReactStage::new(
        Stage::Dynamic,
        Box::new(MockThinker::from_steps(vec![Step::Act {
            thought: "run it".to_string(),
            calls: vec![ToolCall {
                tool: "shell".to_string(),
                args: HashMap::from([("command".to_string(), "sleep 1 && touch marker".to_string())]),
            }],
        }])),
        tools,
        StageConfig::default(),
    );
    let mut pipeline = Pipeline::builder()
        .stage(react(Stage::Router, MockThinker::answers(["next: Dynamic"])))
        .stage(react(Stage::Researcher, MockThinker::answers(Vec::<String>::new())))
        .stage(react(Stage::Static, MockThinker::answers(Vec::<String>::new())))
        .stage(Arc::new(dynamic))
        .build()
        .unwrap();

    let handle = pipeline.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();
    });

    let report = pipeline.run_turn("run the sample").await;
    assert_eq!(report.termination, Termination::Aborted { stage: Stage::Dynamic });

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!dir.path().join("marker").exists());
}
