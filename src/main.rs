use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use droidpilot::agent_engine::{EventBus, Orchestrator, TaskEvent};
use droidpilot::config::{self, AppConfig};
use droidpilot::device::{AdbDriver, DeviceDriver};
use droidpilot::executor::launch::AppCatalog;
use droidpilot::planner::http::HttpPlanner;
use droidpilot::PilotResult;

#[derive(Parser)]
#[command(name = "droidpilot")]
#[command(about = "Drive an Android device towards a goal over ADB")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices as JSON
    Devices,
    /// Run one task and print its report as JSON
    Run {
        /// What the device should accomplish, in plain language
        goal: String,

        /// Serial of the device to use; defaults to the first connected one
        device: Option<String>,

        /// Planner endpoint, overriding the config file
        #[arg(long, env = "DROIDPILOT_PLANNER_ENDPOINT")]
        endpoint: Option<String>,

        /// Iteration cap, overriding the config file
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Keep a JSONL ledger of executed steps
        #[arg(long)]
        persist_ledger: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut cfg = config::load_config_or_default();

    let result = match cli.command {
        Commands::Devices => list_devices(&cfg).await,
        Commands::Run { goal, device, endpoint, max_iterations, persist_ledger } => {
            if let Some(endpoint) = endpoint {
                cfg.planner.endpoint = endpoint;
            }
            if let Some(max) = max_iterations {
                cfg.orchestrator.max_iterations = max;
            }
            cfg.orchestrator.persist_ledger |= persist_ledger;
            run(cfg, &goal, device.as_deref()).await
        }
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "droidpilot failed");
            ExitCode::FAILURE
        }
    }
}

async fn list_devices(cfg: &AppConfig) -> PilotResult<bool> {
    let driver = AdbDriver::new(&cfg.adb);
    let devices = driver.list_devices().await?;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(!devices.is_empty())
}

async fn run(cfg: AppConfig, goal: &str, device: Option<&str>) -> PilotResult<bool> {
    let driver = Arc::new(AdbDriver::new(&cfg.adb));
    let planner = Arc::new(HttpPlanner::from_config(&cfg.planner)?);
    let orchestrator = Orchestrator::new(driver, planner, EventBus::new(), cfg.orchestrator.clone())
        .with_catalog(AppCatalog::with_overrides(&cfg.apps));

    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                TaskEvent::Started { task_id, device, .. } => {
                    tracing::info!(task_id = %task_id, serial = %device.id, model = %device.model, "task started");
                }
                TaskEvent::Log { message, .. } => tracing::info!("{message}"),
                TaskEvent::StepFinished { result, .. } => tracing::info!(
                    step_id = %result.step_id,
                    success = result.success,
                    attempts = result.attempts,
                    error = ?result.error,
                    "step finished"
                ),
                TaskEvent::Finished { .. } | TaskEvent::Failed { .. } => break,
                TaskEvent::Screenshot { .. } | TaskEvent::StatusChanged { .. } => {}
            }
        }
    });

    let report = orchestrator.run_task(goal, device).await;
    let _ = printer.await;
    let report = report?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.success)
}
