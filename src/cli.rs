use crate::config::loader::resolve_policy;
use crate::config::policy::SourceScreen;
use crate::config::presets::get_presets;
use crate::config::types::{ExecutionRequest, Policy};
use crate::config::validator::validate_policy;
use crate::exec::executor::ScriptExecutor;
use crate::observability::metrics::get_metrics;
use crate::utils::json_schema::RunReportV1;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the learner source comes from
#[derive(Args)]
struct SourceArgs {
    /// Lua source file
    #[arg(long, conflicts_with = "code", required_unless_present = "code")]
    file: Option<PathBuf>,
    /// Inline Lua source
    #[arg(long)]
    code: Option<String>,
}

impl SourceArgs {
    fn read(&self) -> Result<String> {
        match (&self.file, &self.code) {
            (_, Some(code)) => Ok(code.clone()),
            (Some(path), None) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read source file {}", path.display())),
            (None, None) => Err(anyhow::anyhow!("one of --file or --code is required")),
        }
    }
}

/// Which policy governs the run
#[derive(Args)]
struct PolicyArgs {
    /// Registered policy preset (see `luabox presets`)
    #[arg(long)]
    preset: Option<String>,
    /// Policy JSON file; wins over --preset
    #[arg(long = "policy", value_name = "FILE")]
    policy_file: Option<PathBuf>,
}

impl PolicyArgs {
    fn resolve(&self) -> Result<Policy> {
        resolve_policy(self.preset.as_deref(), self.policy_file.as_deref())
            .context("failed to resolve execution policy")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Lua script and print its JSON run report
    Run {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        policy: PolicyArgs,
        /// Record one step per source line
        #[arg(long)]
        stepwise: bool,
        /// Append structured audit events to this file
        #[arg(long)]
        audit_log: Option<PathBuf>,
        /// Print Prometheus metrics to stderr after the run
        #[arg(long)]
        metrics: bool,
    },
    /// Validate the policy and screen a script without running it
    Check {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// List registered policy presets
    Presets,
}

pub fn run() -> Result<()> {
    // Initialize structured logging
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            source,
            policy,
            stepwise,
            audit_log,
            metrics,
        } => {
            if let Some(path) = audit_log {
                crate::observability::audit::init_security_logger(Some(path))
                    .context("failed to initialize audit log")?;
            }

            let code = source.read()?;
            let resolved = policy.resolve()?;
            let executor = ScriptExecutor::new(resolved)?;

            let request = if stepwise {
                ExecutionRequest::stepwise(code)
            } else {
                ExecutionRequest::direct(code)
            };
            let started = chrono::Utc::now();
            let outcome = executor.submit(&request)?;
            let report = RunReportV1::from_outcome(
                &outcome,
                executor.policy(),
                policy.preset.as_deref(),
                started,
            );
            println!("{}", report.to_json()?);

            if metrics {
                eprint!("{}", get_metrics().export_prometheus());
            }
            if !executor.ledger().is_balanced() {
                log::error!(
                    "engine instances left open: {:?}",
                    executor.ledger().outstanding()
                );
            }
            if report.has_error() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Check { source, policy } => {
            let code = source.read()?;
            let resolved = policy.resolve()?;
            let validation = validate_policy(&resolved, false)?;
            let screen = SourceScreen::compile(&resolved)?;
            let rejection = screen.check(&code).err();
            let policy_valid = validation.is_valid();

            let verdict = serde_json::json!({
                "policy_fingerprint": resolved.fingerprint(),
                "policy_valid": policy_valid,
                "policy_errors": validation.errors,
                "policy_warnings": validation.warnings,
                "accepted": rejection.is_none(),
                "error": rejection.as_ref().map(|r| &r.error),
            });
            println!("{}", serde_json::to_string_pretty(&verdict)?);

            if !policy_valid || rejection.is_some() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Presets => {
            let listing: Vec<_> = get_presets()
                .list()
                .into_iter()
                .map(|envelope| {
                    serde_json::json!({
                        "id": envelope.id,
                        "name": envelope.name,
                        "version": envelope.version,
                        "purpose": envelope.purpose,
                        "policy_fingerprint": envelope.policy.fingerprint(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(())
        }
    }
}
