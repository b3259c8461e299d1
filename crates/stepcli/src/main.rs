// crates/stepcli/src/main.rs

mod persistence;
mod sandbox;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use persistence::JsonFileStore;
use sandbox::ProcessCodeRunner;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stepcore::{
    EngineOperation, ExecuteFlowOperation, ExecuteStepOperation, ExecutionState, FlowRunResponse,
    FlowVersion, OperationBase, ProgressEvent, ProgressUpdateMode, ResumePayload, Verdict,
    VerdictResponse,
};
use stepruntime::{
    BlockRegistry, EngineServices, FlowRuntime, InMemoryStore, KeyValueStore, RuntimeConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "step")]
#[command(about = "Step engine CLI", long_about = None)]
struct Cli {
    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EngineArgs {
    /// Path to flow version JSON file
    #[arg(short, long)]
    flow: PathBuf,

    /// Execution deadline in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Directory holding compiled code steps
    #[arg(long)]
    code_dir: Option<String>,

    /// Command that runs a code step file
    #[arg(long, default_value = "node")]
    interpreter: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run of a flow
    Run {
        #[command(flatten)]
        engine: EngineArgs,

        /// Trigger payload as JSON string
        #[arg(short, long)]
        payload: Option<String>,

        /// Where paused runs are kept
        #[arg(long, default_value = ".step-runs")]
        state_dir: PathBuf,
    },

    /// Resume a paused run
    Resume {
        #[command(flatten)]
        engine: EngineArgs,

        /// Id printed when the run paused
        #[arg(long)]
        run_id: String,

        /// Resume key of the paused frame (defaults to the first paused one)
        #[arg(long)]
        path: Option<String>,

        /// Value passed to the paused action as `action`
        #[arg(long)]
        action: Option<String>,

        /// Resume request body as JSON string
        #[arg(long)]
        body: Option<String>,

        /// Where paused runs are kept
        #[arg(long, default_value = ".step-runs")]
        state_dir: PathBuf,
    },

    /// Run a single step against sample data
    TestStep {
        #[command(flatten)]
        engine: EngineArgs,

        /// Name of the step to test
        #[arg(short, long)]
        step: String,

        /// Sample outputs of earlier steps, as a JSON object keyed by step name
        #[arg(long)]
        sample: Option<String>,
    },

    /// List available block actions
    Actions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            engine,
            payload,
            state_dir,
        } => {
            run_flow(engine, payload, state_dir).await?;
        }

        Commands::Resume {
            engine,
            run_id,
            path,
            action,
            body,
            state_dir,
        } => {
            resume_flow(engine, run_id, path, action, body, state_dir).await?;
        }

        Commands::TestStep {
            engine,
            step,
            sample,
        } => {
            test_step(engine, step, sample).await?;
        }

        Commands::Actions => {
            list_actions();
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn registry() -> BlockRegistry {
    let mut registry = BlockRegistry::new();
    stepblocks::register_all(&mut registry);
    registry
}

fn build_runtime(engine: &EngineArgs, store: Arc<dyn KeyValueStore>) -> FlowRuntime {
    let mut config = RuntimeConfig::from_env();
    if let Some(secs) = engine.timeout {
        config.execution_timeout = Duration::from_secs(secs);
    }
    if let Some(dir) = &engine.code_dir {
        config.base_code_directory = dir.clone();
    }

    let builder = EngineServices::builder()
        .blocks(Arc::new(registry()))
        .code_runner(Arc::new(ProcessCodeRunner::new(engine.interpreter.clone())))
        .store(store);
    FlowRuntime::with_broadcast_progress(builder, config)
}

fn load_flow(file: &Path) -> Result<FlowVersion> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read flow file {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid flow version in {}", file.display()))
}

fn local_base(flow_version: FlowVersion) -> OperationBase {
    OperationBase {
        project_id: "local".to_string(),
        engine_token: String::new(),
        public_api_url: "http://localhost:3000".to_string(),
        internal_api_url: "http://localhost:3000".to_string(),
        flow_version,
    }
}

fn parse_json_arg(raw: Option<String>) -> Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(&raw).context("Argument is not valid JSON"),
        None => Ok(Value::Null),
    }
}

async fn run_flow(engine: EngineArgs, payload: Option<String>, state_dir: PathBuf) -> Result<()> {
    println!("🚀 Loading flow from: {}", engine.flow.display());
    let flow = load_flow(&engine.flow)?;
    println!("📋 Flow: {} ({})", flow.display_name, flow.flow_id);

    let run_id = uuid::Uuid::new_v4().to_string();
    let store = Arc::new(JsonFileStore::open(persistence::store_path(&state_dir, &run_id)).await?);
    let runtime = build_runtime(&engine, store);

    let operation = EngineOperation::ExecuteFlow(ExecuteFlowOperation {
        base: local_base(flow),
        flow_run_id: run_id.clone(),
        trigger_payload: parse_json_arg(payload)?,
        resume_payload: None,
        progress_update_mode: ProgressUpdateMode::Continuous,
    });

    let state = execute_with_events(runtime, &operation, None).await?;
    report(&state, &state_dir, &run_id).await
}

async fn resume_flow(
    engine: EngineArgs,
    run_id: String,
    path: Option<String>,
    action: Option<String>,
    body: Option<String>,
    state_dir: PathBuf,
) -> Result<()> {
    let flow = load_flow(&engine.flow)?;
    let previous = persistence::load_state(&state_dir, &run_id).await?;
    if previous.verdict() != Verdict::Paused {
        return Err(anyhow!("Run {} is not paused", run_id));
    }

    let mut query_params = HashMap::new();
    if let Some(path) = path.or_else(|| default_resume_path(&previous)) {
        query_params.insert("path".to_string(), path);
    }
    if let Some(action) = action {
        query_params.insert("action".to_string(), action);
    }
    let resume_payload = ResumePayload {
        query_params,
        body: parse_json_arg(body)?,
        headers: HashMap::new(),
    };

    println!("▶️  Resuming run {}", run_id);
    let store = Arc::new(JsonFileStore::open(persistence::store_path(&state_dir, &run_id)).await?);
    let runtime = build_runtime(&engine, store);
    let operation = EngineOperation::ExecuteFlow(ExecuteFlowOperation {
        base: local_base(flow),
        flow_run_id: run_id.clone(),
        trigger_payload: Value::Null,
        resume_payload: Some(resume_payload),
        progress_update_mode: ProgressUpdateMode::Continuous,
    });

    let state = execute_with_events(runtime, &operation, Some(previous)).await?;
    report(&state, &state_dir, &run_id).await
}

async fn test_step(engine: EngineArgs, step: String, sample: Option<String>) -> Result<()> {
    let flow = load_flow(&engine.flow)?;
    let sample_data: HashMap<String, Value> = match parse_json_arg(sample)? {
        Value::Null => HashMap::new(),
        Value::Object(map) => map.into_iter().collect(),
        _ => return Err(anyhow!("Sample data must be a JSON object")),
    };

    println!("🧪 Testing step: {}", step);
    let runtime = build_runtime(&engine, Arc::new(InMemoryStore::new()));
    let operation = EngineOperation::ExecuteStep(ExecuteStepOperation {
        base: local_base(flow),
        step_name: step,
        sample_data,
    });

    let state = runtime.execute(&operation, None).await?;
    print_summary(&state)
}

/// Run while printing progress events as they arrive.
async fn execute_with_events(
    runtime: FlowRuntime,
    operation: &EngineOperation,
    previous: Option<ExecutionState>,
) -> Result<ExecutionState> {
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ProgressEvent::RunProgress { snapshot, .. } => {
                    if let Some((name, step)) = snapshot.steps.iter().last() {
                        println!("  ⚡ {} -> {:?} ({} steps so far)", name, step.status, snapshot.steps.len());
                    }
                }
                ProgressEvent::RunFinished {
                    verdict, duration_ms, ..
                } => {
                    println!("✨ Run finished as {:?} in {}ms", verdict, duration_ms);
                }
            }
        }
    });

    let result = runtime.execute(operation, previous).await;
    // Dropping the runtime closes the event channel so the printer drains and exits.
    drop(runtime);
    let _ = event_task.await;
    Ok(result?)
}

async fn report(state: &ExecutionState, state_dir: &Path, run_id: &str) -> Result<()> {
    print_summary(state)?;
    if state.verdict() == Verdict::Paused {
        let path = persistence::save_state(state_dir, run_id, state).await?;
        println!();
        println!("⏸️  Run paused, state saved to {}", path.display());
        println!("Resume it with:");
        println!("  step resume --flow <file> --run-id {}", run_id);
    } else {
        persistence::remove_state(state_dir, run_id).await?;
    }
    Ok(())
}

fn print_summary(state: &ExecutionState) -> Result<()> {
    let response = FlowRunResponse::from(state);
    println!();
    println!("📊 Execution Summary:");
    println!("   Verdict: {:?}", response.verdict);
    println!("   Tasks: {}", response.tasks);
    println!("   Duration: {}ms", response.duration_ms);
    if let Some(error) = &response.error {
        println!(
            "   ❌ {} failed: {}",
            error.step_name.as_deref().unwrap_or("run"),
            error.message
        );
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// First paused frame recorded in the pause metadata.
fn default_resume_path(state: &ExecutionState) -> Option<String> {
    let Some(VerdictResponse::Paused { pause_metadata, .. }) = state.verdict_response() else {
        return None;
    };
    pause_metadata
        .get("pausedIterations")
        .and_then(|iterations| iterations.get(0))
        .and_then(|first| first.get("path"))
        .or_else(|| pause_metadata.get("path"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn list_actions() {
    println!("📦 Available Block Actions:");
    println!();

    let registry = registry();
    for (block, version, action) in registry.list_actions() {
        match registry.get_metadata(&block, &action) {
            Some(metadata) => {
                println!("  • {}@{}/{} ({})", block, version, action, metadata.category);
                if !metadata.description.is_empty() {
                    println!("    {}", metadata.description);
                }
            }
            None => println!("  • {}@{}/{}", block, version, action),
        }
    }
}
