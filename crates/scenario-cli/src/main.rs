// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A thin CLI harness for the scenario execution engine. Not the
//! product surface (that's the out-of-scope UI layer) — just a caller
//! that loads a scenario document, wires a dispatcher, drives the
//! scheduler to completion, and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use scenario_core::model::{ExecutionMode, ModeOverrides, Scenario};
use scenario_core::observer::RunEvent;
use scenario_core::{graph, schema, RunStatus, StepRunStatus};
use scenario_core::Scheduler;
use scenario_dispatch::{ReqwestDispatcher, ScriptedResponse, StubDispatcher};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scenario-runner")]
#[command(version, about = "Scenario execution engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a scenario document's graph integrity and parameter schema
    Validate {
        /// Path to the scenario JSON file
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Run a scenario
    Run {
        /// Path to the scenario JSON file
        #[arg(value_name = "FILE")]
        file: String,

        /// Input params: a JSON string, or a path to a JSON file
        #[arg(short, long)]
        input: Option<String>,

        /// Per-step execution mode overrides, e.g. step_1=bypass,step_2=manual
        #[arg(long, value_delimiter = ',')]
        mode_override: Vec<String>,

        /// Use an in-memory stub dispatcher that returns 200 {} for every
        /// request, instead of making real network calls
        #[arg(long)]
        stub: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("scenario_core={log_level},scenario_dispatch={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Validate { file } => validate_scenario(&file),
        Commands::Run {
            file,
            input,
            mode_override,
            stub,
        } => run_scenario(&file, input.as_deref(), &mode_override, stub).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn load_scenario(file_path: &str) -> Result<Scenario> {
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read scenario file: {}", file_path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse scenario JSON: {}", file_path))
}

fn validate_scenario(file_path: &str) -> Result<()> {
    info!("Validating scenario: {}", file_path);
    println!("{} {}", "Validating scenario:".cyan().bold(), file_path);

    let scenario = load_scenario(file_path)?;
    info!("Parsed scenario: {} v{}", scenario.name, scenario.version);

    graph::validate(&scenario).with_context(|| "Scenario graph validation failed")?;

    // Parameter schema is validated for real against run()'s actual
    // inputs; here we only check it accepts an empty input set, which
    // tells the caller whether --input will be required at run time.
    if let Err(err) = schema::validate(&scenario.parameter_schema, &Value::Object(Default::default())) {
        warn!("{err}");
        println!(
            "  {} run will require --input ({err})",
            "note:".yellow()
        );
    }

    println!("{}", "\u{2713} Scenario graph is valid".green().bold());
    println!("  Name: {}", scenario.name);
    println!("  Version: {}", scenario.version);
    println!("  Steps: {}", scenario.steps.len());
    println!("  Servers: {}", scenario.servers.len());
    println!("  Parameters: {}", scenario.parameter_schema.len());

    Ok(())
}

fn parse_input(input_str: &str) -> Result<Value> {
    if Path::new(input_str).exists() {
        let content = fs::read_to_string(input_str)
            .with_context(|| format!("Failed to read input file: {}", input_str))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse input JSON from file: {}", input_str))
    } else {
        serde_json::from_str(input_str).with_context(|| "Failed to parse input JSON string")
    }
}

fn parse_mode_overrides(entries: &[String]) -> Result<ModeOverrides> {
    let mut overrides = HashMap::new();
    for entry in entries {
        let (step_id, mode) = entry
            .split_once('=')
            .with_context(|| format!("mode override '{entry}' is not in stepId=mode form"))?;
        let mode = match mode {
            "auto" => ExecutionMode::Auto,
            "manual" => ExecutionMode::Manual,
            "delayed" => ExecutionMode::Delayed,
            "bypass" => ExecutionMode::Bypass,
            other => anyhow::bail!("unknown execution mode '{other}' in override '{entry}'"),
        };
        overrides.insert(step_id.to_string(), mode);
    }
    Ok(overrides)
}

async fn run_scenario(file_path: &str, input: Option<&str>, mode_override: &[String], stub: bool) -> Result<()> {
    info!("Running scenario: {}", file_path);
    println!("{} {}", "Running scenario:".cyan().bold(), file_path);

    let scenario = load_scenario(file_path)?;
    info!("Parsed scenario: {} v{}", scenario.name, scenario.version);

    let params = match input {
        Some(input_str) => parse_input(input_str)?,
        None => Value::Object(Default::default()),
    };
    let overrides = parse_mode_overrides(mode_override)?;

    let dispatcher: Arc<dyn scenario_core::Dispatcher> = if stub {
        info!("Using stub dispatcher (no real network calls)");
        let stub = StubDispatcher::new();
        stub.set_default(ScriptedResponse::ok(serde_json::json!({})));
        Arc::new(stub)
    } else {
        Arc::new(ReqwestDispatcher::new())
    };

    let scheduler = Scheduler::new(dispatcher);
    let mut handle = scheduler
        .run(scenario, params, overrides)
        .with_context(|| "Scenario failed to start (validation or graph error)")?;

    println!("{}", "Executing scenario...".cyan());
    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    let context = handle.join().await;
    printer.abort();

    match context.status {
        RunStatus::Completed => println!("{}", "\u{2713} Scenario completed successfully".green().bold()),
        RunStatus::Failed => println!("{}", "\u{2717} Scenario failed".red().bold()),
        RunStatus::Cancelled => println!("{}", "Scenario cancelled".yellow().bold()),
        other => println!("Scenario ended in status {:?}", other),
    }

    println!("\n{}", "Step results:".cyan().bold());
    println!(
        "{}",
        serde_json::to_string_pretty(&context.step_results).unwrap_or_else(|_| format!("{:?}", context.step_results))
    );

    if !matches!(context.status, RunStatus::Completed) {
        anyhow::bail!("run ended with status {:?}", context.status);
    }
    Ok(())
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::RunStateChanged(status) => {
            println!("{} {:?}", "[run]".dimmed(), status);
        }
        RunEvent::StepStarted { step_id, .. } => {
            println!("{} {}", "\u{25cf}".cyan(), step_id);
        }
        RunEvent::StepFinished(result) => {
            let marker = match result.status {
                StepRunStatus::Success => "\u{2713}".green(),
                StepRunStatus::Failed => "\u{2717}".red(),
                StepRunStatus::Skipped => "\u{2013}".dimmed(),
                StepRunStatus::Cancelled => "\u{2715}".yellow(),
                _ => "\u{25cb}".normal(),
            };
            println!("  {} {} ({:?})", marker, result.step_id, result.status);
        }
        RunEvent::LoopEntered(frame) => {
            println!("{} {} (0/{})", "[loop enter]".dimmed(), frame.step_id, frame.total_iterations);
        }
        RunEvent::LoopIterationAdvanced { step_id, iteration } => {
            println!("{} {} iteration {}", "[loop]".dimmed(), step_id, iteration);
        }
        RunEvent::LoopExited { step_id } => {
            println!("{} {}", "[loop exit]".dimmed(), step_id);
        }
        RunEvent::LogEmitted(log) => {
            println!("{} {}", format!("[{:?}]", log.level).dimmed(), log.message);
        }
        RunEvent::ManualGateReached { step_id } => {
            println!("{} {}", "[manual gate]".yellow().bold(), step_id);
        }
    }
}
