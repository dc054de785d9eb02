//! `planbench` – evaluate a VLM planner on ALFRED or tabletop manipulation.
//!
//! ```text
//! planbench env=eb-alf model_name=gpt-4o-mini n_shots=10 \
//!     memory_mode=failure_only previous_results_dir=running/eb_alfred/gpt-4o-mini/base/results
//! ```
//!
//! Exits non-zero when the configuration is invalid or a simulator session
//! cannot be opened. Ctrl-C finishes the current episode, writes the
//! summary, and exits.

mod config;
mod examples;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use planbench_env::{Environment, HttpEnv};
use planbench_planner::{ChatBackend, LlmDriver, VlmPlanner};
use planbench_runtime::{Evaluator, telemetry};
use planbench_types::BenchError;
use tracing::{error, info, warn};

use crate::config::EvalConfig;

fn main() -> ExitCode {
    let guard = telemetry::init_tracing("planbench");
    info!(otlp = guard.is_exporting(), "tracing initialised");
    print_banner();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = match EvalConfig::from_args(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red().bold());
            return ExitCode::from(2);
        }
    };
    info!(config = ?cfg, "configuration loaded");

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – finishing the current episode …".yellow().bold()
        );
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Cannot start async runtime".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, shutdown)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "evaluation aborted");
            eprintln!("{}: {e}", "Evaluation aborted".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: EvalConfig, shutdown: Arc<AtomicBool>) -> Result<(), BenchError> {
    let backend: Arc<dyn ChatBackend> = Arc::new(
        LlmDriver::new(&cfg.llm_url, &cfg.model_name)
            .with_api_key(cfg.api_key())
            .with_sampling(cfg.temperature, cfg.max_tokens),
    );

    for eval_set in &cfg.eval_sets {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        println!(
            "\n  {} {} {} {}",
            "Evaluating".bold(),
            eval_set.cyan(),
            "with".dimmed(),
            cfg.model_name.bold()
        );

        let evaluator = Evaluator::new(cfg.env, cfg.evaluator_config()).with_shutdown(shutdown.clone());
        let pool = examples::pool_for(&cfg, eval_set).map_err(|e| BenchError::Config(e.to_string()))?;
        let mut env = HttpEnv::connect(cfg.env_config(eval_set, evaluator.log_path(eval_set)))
            .await
            .map_err(|e| BenchError::Environment {
                component: cfg.sim_url.clone(),
                details: e.to_string(),
            })?;
        let mut planner = VlmPlanner::new(cfg.planner_config(), backend.clone(), env.action_space().clone(), pool);

        let summary = evaluator.evaluate_set(&mut env, &mut planner).await?;
        println!(
            "  {} {}/{} succeeded ({:.1}%), avg planner steps {:.2}, results in {}",
            "✓".green().bold(),
            summary.num_success,
            summary.total_num_tasks,
            summary.success_rate * 100.0,
            summary.avg_planner_steps,
            summary.save_path.display().to_string().bold()
        );
    }
    Ok(())
}

fn print_banner() {
    println!();
    println!("{}", r#"         __              __                 __  "#.bold().cyan());
    println!("{}", r#"  ___  / /__ ____  ___ / /  ___ ___  ____/ /  "#.bold().cyan());
    println!("{}", r#" / _ \/ / _ `/ _ \/ _ \/ _ \/ -_) _ \/ __/ _ \ "#.bold().cyan());
    println!("{}", r#"/ .__/_/\_,_/_//_/_//_/_.__/\__/_//_/\__/_//_/ "#.bold().cyan());
    println!("{}", r#"/_/                                            "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "planbench".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Embodied planner evaluation harness");
    println!();
}
