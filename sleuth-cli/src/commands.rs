//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::render::progress_line;
use anyhow::Context;
use futures::StreamExt;
use sleuth_core::config::{SleuthConfig, load_config};
use sleuth_core::gateway::{GatewayState, run_gateway};
use sleuth_core::research::{Orchestrator, ResearchReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            question,
            max_iterations,
            max_critique_loops,
            json,
            output,
        } => {
            let mut config = load(workspace)?;
            if let Some(n) = max_iterations {
                config.research.max_iterations = n;
            }
            if let Some(n) = max_critique_loops {
                config.research.max_critique_loops = n;
            }
            handle_run(&question, config, json, output).await
        }
        Commands::Serve { host, port } => {
            let mut config = load(workspace)?;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            handle_serve(config).await
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<SleuthConfig> {
    let config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    for warning in config.validate() {
        warn!("{}", warning);
    }
    Ok(config)
}

fn build_orchestrator(config: &SleuthConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let orchestrator = Orchestrator::from_config(config).with_context(|| {
        format!(
            "Failed to initialize the language model (is {} set?)",
            config.llm.api_key_env
        )
    })?;
    if orchestrator.search_is_mock() {
        eprintln!("  note: search is running in mock mode");
    }
    Ok(Arc::new(orchestrator))
}

async fn handle_run(
    question: &str,
    config: SleuthConfig,
    json: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config)?;
    let mut handle = orchestrator.spawn(question);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                eprintln!("\n  interrupted, cancelling research...");
                interrupted = true;
                handle.cancel.cancel();
            }
            event = handle.events.next() => match event {
                Some(event) => {
                    if let Some(line) = progress_line(&event) {
                        eprintln!("{}", line);
                    }
                }
                None => break,
            },
        }
    }

    let report = handle.join.await.context("Research task panicked")??;
    print_report(&report, json)?;

    if let Some(path) = output {
        std::fs::write(&path, &report.report)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        eprintln!("  report written to {}", path.display());
    }
    Ok(())
}

fn print_report(report: &ResearchReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("\n{}\n", report.report);
        eprintln!("  {}", report.summary_line());
    }
    Ok(())
}

async fn handle_serve(config: SleuthConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config)?;
    let state = Arc::new(GatewayState::new(orchestrator, config.gateway.clone()));
    println!(
        "Sleuth gateway listening on http://{}:{}",
        config.gateway.host, config.gateway.port
    );
    run_gateway(state).await.context("Gateway server failed")?;
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".sleuth");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&SleuthConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
