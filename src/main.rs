use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use triage::banner::{BannerInfo, print_banner, print_session_summary};
use triage::config::{Config, Overrides, Settings};
use triage::consts::default_db_path;
use triage::dispatch::Stage;
use triage::engine::pipeline::{Pipeline, Termination, TurnReport};
use triage::events::{Event, EventBus};
use triage::logging;
use triage::spinner::Spinner;
use triage::stage::react::{ReactStage, StageConfig};
use triage::thinker::Thinker;
use triage::thinker::anthropic::AnthropicThinker;
use triage::thinker::human::HumanThinker;
use triage::tools::ToolRegistry;
use triage::tools::ask_human::AskHumanTool;
use triage::tools::search::SearchTool;
use triage::tools::shell::{ShellConfig, ShellMode, ShellTool};
use triage::tools::wikipedia::WikipediaTool;

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum Provider {
    Human,
    Anthropic,
}

#[derive(Parser)]
#[command(name = "triage", version, about = "Routes security tasks to the right specialist.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// LLM provider
    #[arg(short, long, value_enum, default_value_t = Provider::Anthropic)]
    provider: Provider,

    /// Model for every stage (overrides stored preferences)
    #[arg(long)]
    model: Option<String>,

    /// SQLite database for stored preferences
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Researcher round trips allowed per turn
    #[arg(long)]
    max_research_loops: Option<usize>,

    /// Per-stage timeout in seconds
    #[arg(long)]
    stage_timeout: Option<u64>,

    /// Per-tool-call timeout in seconds
    #[arg(short, long)]
    tool_timeout: Option<u64>,

    /// Reason/act steps per stage
    #[arg(long)]
    max_steps: Option<usize>,

    /// Allow write operations in the dynamic stage's shell
    #[arg(long, default_value_t = false)]
    allow_write: bool,

    /// Working directory for shell commands
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Skip confirmation prompts before executing commands
    #[arg(long, default_value_t = false)]
    no_confirm: bool,

    /// Run a single task and exit (non-interactive)
    #[arg(short, long)]
    run: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Read or change stored preferences
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print one value
    Get { key: String },
    /// Store a value, e.g. `max_research_loops 3` or `model.researcher <id>`
    Set { key: String, value: String },
    /// Remove a stored value
    Unset { key: String },
    /// Print every stored value
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let config = Config::open(&db_path.to_string_lossy())?;

    if let Some(Command::Config { action }) = &cli.command {
        return handle_config(&config, action);
    }

    let overrides = Overrides {
        model: cli.model.clone(),
        max_research_loops: cli.max_research_loops,
        stage_timeout_secs: cli.stage_timeout,
        tool_timeout_secs: cli.tool_timeout,
        max_steps: cli.max_steps,
    };
    let settings = Settings::resolve(&config, &overrides)?;

    let working_dir = cli
        .work_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("triage-sandbox"));
    let events = Arc::new(EventBus::default());
    let mut pipeline = build_pipeline(&cli, &settings, &working_dir, &events).await?;

    print_banner(&BannerInfo {
        provider: match cli.provider {
            Provider::Human => "human",
            Provider::Anthropic => "anthropic",
        },
        model: if cli.provider == Provider::Human {
            "—"
        } else {
            settings.model.as_str()
        },
        shell_mode: if cli.allow_write { "read-write" } else { "read-only" },
        working_dir: &working_dir,
        max_research_loops: settings.max_research_loops,
        stage_timeout_secs: settings.stage_timeout.as_secs(),
    });

    let show_spinner = cli.provider != Provider::Human;

    if let Some(task) = &cli.run {
        let report = run_turn(&mut pipeline, task, show_spinner).await;
        print_report(&report);
        print_session_summary(pipeline.session_usage());
        return Ok(());
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("\ntriage> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            result = lines.next_line() => {
                match result {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        // Ctrl+D (EOF)
                        println!();
                        break;
                    }
                    Err(e) => {
                        eprintln!("input error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if task.eq_ignore_ascii_case("exit") || task.eq_ignore_ascii_case("quit") {
            break;
        }
        if task.eq_ignore_ascii_case("reset") {
            pipeline.reset();
            println!("conversation cleared.");
            continue;
        }

        let report = run_turn(&mut pipeline, task, show_spinner).await;
        print_report(&report);
    }

    print_session_summary(pipeline.session_usage());
    Ok(())
}

async fn build_pipeline(
    cli: &Cli,
    settings: &Settings,
    working_dir: &Path,
    events: &Arc<EventBus>,
) -> anyhow::Result<Pipeline> {
    let client = reqwest::Client::new();
    let stage_config = StageConfig {
        max_steps: settings.max_steps,
        tool_timeout: settings.tool_timeout,
        stage_timeout: settings.stage_timeout,
    };
    let shell = |mode: ShellMode| {
        Arc::new(ShellTool::new(ShellConfig {
            mode,
            working_dir: working_dir.to_path_buf(),
            require_confirmation: !cli.no_confirm,
            ..ShellConfig::default()
        }))
    };

    let mut builder = Pipeline::builder()
        .max_research_loops(settings.max_research_loops)
        .events(Arc::clone(events));

    for stage in Stage::EXECUTABLE {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(SearchTool::new(client.clone()))).await;
        match stage {
            Stage::Router => {
                tools.register(Arc::new(WikipediaTool::new(client.clone()))).await;
            }
            Stage::Researcher => {
                tools.register(Arc::new(WikipediaTool::new(client.clone()))).await;
                tools.register(Arc::new(AskHumanTool)).await;
            }
            Stage::Static => tools.register(shell(ShellMode::ReadOnly)).await,
            Stage::Dynamic => {
                let mode = if cli.allow_write {
                    ShellMode::ReadWrite
                } else {
                    ShellMode::ReadOnly
                };
                tools.register(shell(mode)).await;
            }
            Stage::Start | Stage::End => {}
        }

        let thinker: Box<dyn Thinker> = match cli.provider {
            Provider::Human => Box::new(HumanThinker),
            Provider::Anthropic => Box::new(AnthropicThinker::from_env(
                Some(settings.model_for(stage).to_string()),
                client.clone(),
            )?),
        };

        let executor = ReactStage::new(stage, thinker, tools, stage_config.clone())
            .with_events(Arc::clone(events));
        builder = builder.stage(Arc::new(executor));
    }

    Ok(builder.build()?)
}

/// Run one turn, showing progress from the event bus. Ctrl+C aborts the turn.
async fn run_turn(pipeline: &mut Pipeline, task: &str, show_spinner: bool) -> TurnReport {
    let mut events = pipeline.events().subscribe();
    let abort = pipeline.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let spinner = show_spinner.then(|| Spinner::start("router"));
    let turn = pipeline.run_turn(task);
    tokio::pin!(turn);

    let report = loop {
        tokio::select! {
            report = &mut turn => break report,
            received = events.recv() => match received {
                Ok(event) => render_event(spinner.as_ref(), &event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {}
            },
        }
    };

    ctrl_c.abort();
    if let Some(spinner) = spinner {
        spinner.stop().await;
    }
    report
}

fn render_event(spinner: Option<&Spinner>, event: &Event) {
    let line = match event {
        Event::StageStarted { stage } => {
            if let Some(spinner) = spinner {
                spinner.set_label(stage.to_string());
            }
            return;
        }
        Event::ToolCalled { stage, tool, ok } => {
            format!("  [{}] {} {}", stage, if *ok { "✓" } else { "✗" }, tool)
        }
        Event::StageCompleted {
            stage,
            directive,
            next,
        } => format!("  [{}] done ({}) → {}", stage, directive, next),
        Event::LoopGuardTripped { limit } => {
            format!("  [guard] {} research rounds used, stopping", limit)
        }
        Event::TurnAborted { stage } => format!("  [abort] stopped during {}", stage),
    };
    eprint!("\x1b[2K\r");
    eprintln!("{}", line);
}

fn print_report(report: &TurnReport) {
    match report.termination {
        Termination::Aborted { .. } => println!("\ninterrupted"),
        Termination::Completed | Termination::LoopGuard { .. } => {}
    }
    println!("\n=> {}", report.reply);
}

fn handle_config(config: &Config, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match config.get(key)? {
            Some(value) => println!("{}", value),
            None => println!("{} is not set", key),
        },
        ConfigAction::Set { key, value } => {
            config.set_checked(key, value)?;
            println!("✓ {} = {}", key, value);
        }
        ConfigAction::Unset { key } => {
            config.remove(key)?;
            println!("✓ {} removed", key);
        }
        ConfigAction::List => {
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
    }
    Ok(())
}
