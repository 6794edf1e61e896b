//! Algprob CLI
//!
//! Command-line front end for a remote Model server:
//! - Sampling outcomes of a distribution function (`sample`)
//! - Evaluating proof files into probability lower bounds (`prove`)

use algprob_model::{sample, CheckedModel, DistrCall, Model, Value};
use algprob_proof::{
    export_label, load_proofs, solve_proof_system, ExternalLabel, SolveStats, SolverConfig,
};
use algprob_remote::{RemoteModel, TcpTransport};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_solver_config, SolverOverrides};

#[derive(Parser)]
#[command(name = "algprob")]
#[command(
    author,
    version,
    about = "Algprob: sample and prove probabilistic distribution functions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Draw outcomes of a distribution function from a remote Model.
    Sample {
        /// Model server address (host:port)
        #[arg(long)]
        connect: String,
        /// Function to call
        function: String,
        /// Parameter as host-neutral JSON (repeat once per parameter)
        #[arg(long = "arg", value_parser = parse_json)]
        args: Vec<serde_json::Value>,
        /// Number of draws
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// Seed for reproducible draws
        #[arg(long)]
        seed: Option<u64>,
        /// Format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Evaluate a proof file against a remote Model.
    ///
    /// Every proved label is reported with its log-probability lower bound.
    Prove {
        /// Model server address (host:port)
        #[arg(long)]
        connect: String,
        /// Proof file (JSON array of proofs)
        proofs: PathBuf,
        /// Solver settings (JSON: `tolerance`, `max_passes`)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Convergence tolerance for recursive labels (overrides --config)
        #[arg(long)]
        tolerance: Option<f64>,
        /// Pass limit for recursive labels (overrides --config)
        #[arg(long)]
        max_passes: Option<usize>,
        /// Format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(anyhow!("unknown output format `{other}` (expected text|json)")),
        }
    }
}

fn parse_json(s: &str) -> std::result::Result<serde_json::Value, String> {
    serde_json::from_str(s).map_err(|e| format!("not valid JSON: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sample {
            connect,
            function,
            args,
            count,
            seed,
            format,
        } => cmd_sample(&connect, &function, &args, count, seed, &format),
        Commands::Prove {
            connect,
            proofs,
            config,
            tolerance,
            max_passes,
            format,
        } => {
            let overrides = SolverOverrides {
                tolerance,
                max_passes,
            };
            cmd_prove(&connect, &proofs, config.as_deref(), overrides, &format)
        }
    }
}

fn connect_model(addr: &str) -> Result<CheckedModel<RemoteModel<TcpTransport>>> {
    let remote = RemoteModel::connect(addr)
        .with_context(|| format!("failed to connect to model server {addr}"))?;
    Ok(CheckedModel::new(remote))
}

// ============================================================================
// sample
// ============================================================================

fn cmd_sample(
    addr: &str,
    function: &str,
    args: &[serde_json::Value],
    count: usize,
    seed: Option<u64>,
    format: &str,
) -> Result<()> {
    let format = OutputFormat::parse(format)?;
    let mut model = connect_model(addr)?;
    let outcomes = sample_outcomes(&mut model, function, args, count, seed)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcomes)?),
        OutputFormat::Text => {
            for outcome in &outcomes {
                println!("{}", render_outcome(outcome));
            }
            eprintln!(
                "{} {} draw(s) of {}",
                "ok".green().bold(),
                outcomes.len(),
                function.bold()
            );
        }
    }
    Ok(())
}

/// Intern `args`, draw `count` outcomes of `function(args)` and export each one.
fn sample_outcomes<M: Model + ?Sized>(
    model: &mut M,
    function: &str,
    args: &[serde_json::Value],
    count: usize,
    seed: Option<u64>,
) -> Result<Vec<Vec<serde_json::Value>>> {
    let mut handles = Vec::with_capacity(args.len());
    for arg in args {
        let reference = model
            .from_external(arg.clone())
            .with_context(|| format!("failed to intern argument {arg}"))?;
        handles.push(reference);
    }
    let call = DistrCall::new(function, handles.iter().copied().map(Value::Literal));
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut outcomes = Vec::with_capacity(count);
    for draw in 0..count {
        // every draw consumes one count of each argument
        for &reference in &handles {
            model.modify_reference_count(reference, 1)?;
        }
        let results =
            sample(model, &call, &mut rng).with_context(|| format!("draw {draw} of {call} failed"))?;
        let mut outcome = Vec::with_capacity(results.len());
        for reference in results {
            outcome.push(model.to_external(reference)?);
            model.modify_reference_count(reference, -1)?;
        }
        outcomes.push(outcome);
    }
    for reference in handles {
        model.modify_reference_count(reference, -1)?;
    }
    tracing::debug!(call = %call, draws = outcomes.len(), "sampling finished");
    Ok(outcomes)
}

fn render_outcome(outcome: &[serde_json::Value]) -> String {
    outcome
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// prove
// ============================================================================

#[derive(Debug, Serialize)]
struct ProveReport {
    proofs: Vec<ProvedLabel>,
    bindings: BTreeMap<String, serde_json::Value>,
    stats: SolveStats,
}

#[derive(Debug, Serialize)]
struct ProvedLabel {
    label: ExternalLabel,
    /// `null` for an event with no possible execution path.
    log_prob: Option<f64>,
    probability: f64,
}

fn cmd_prove(
    addr: &str,
    proofs: &std::path::Path,
    config: Option<&std::path::Path>,
    overrides: SolverOverrides,
    format: &str,
) -> Result<()> {
    let format = OutputFormat::parse(format)?;
    let config = load_solver_config(config, overrides)?;
    let text = fs::read_to_string(proofs)
        .with_context(|| format!("failed to read proof file {}", proofs.display()))?;
    let mut model = connect_model(addr)?;
    let report = prove_report(&mut model, &text, config)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn prove_report<M: Model>(model: &mut M, text: &str, config: SolverConfig) -> Result<ProveReport> {
    let proofs = load_proofs(model, text).context("failed to load proofs")?;
    tracing::info!(proofs = proofs.len(), "evaluating proof system");
    let results =
        solve_proof_system(&mut *model, &proofs, config).context("proof evaluation failed")?;

    let mut proved = Vec::with_capacity(results.proved.len());
    for (label, log_prob) in results.proved_log_probs() {
        proved.push(ProvedLabel {
            label: export_label(model, label)?,
            log_prob: log_prob.is_finite().then_some(log_prob),
            probability: log_prob.exp(),
        });
    }
    let mut bindings = BTreeMap::new();
    for binding in &results.bindings {
        bindings.insert(binding.name.clone(), model.to_external(binding.value)?);
    }
    Ok(ProveReport {
        proofs: proved,
        bindings,
        stats: results.stats,
    })
}

fn print_report(report: &ProveReport) {
    for proved in &report.proofs {
        match proved.log_prob {
            Some(log_prob) => println!(
                "{} {}  log p = {:.6}  p = {:.6}",
                "proved".green().bold(),
                proved.label,
                log_prob,
                proved.probability
            ),
            None => println!("{} {}  p = 0", "impossible".yellow().bold(), proved.label),
        }
    }
    for (name, value) in &report.bindings {
        println!("  {} ?{name} = {value}", "→".cyan());
    }
    let stats = &report.stats;
    eprintln!(
        "{} {} labels, {} components ({} recursive), {} passes, {} model queries ({} cached)",
        "info:".yellow().bold(),
        stats.labels,
        stats.components,
        stats.recursive_components,
        stats.passes,
        stats.model_queries,
        stats.cache_hits
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use algprob_model::{Arg, FunctionModel};
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn nested_model() -> FunctionModel {
        FunctionModel::builder()
            .function("outer", |b, _| {
                b.call("inner", [], ["x"])?;
                Ok(vec![Arg::local("x")])
            })
            .function("inner", |_b, _| Ok(vec![Arg::literal(true)]))
            .build()
    }

    #[test]
    fn parses_sample_arguments() {
        let cli = Cli::try_parse_from([
            "algprob",
            "sample",
            "--connect",
            "127.0.0.1:7000",
            "biasFromBool",
            "--arg",
            "true",
            "--arg",
            r#"{"k": [1, 2]}"#,
            "--count",
            "5",
            "--seed",
            "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Sample {
                function,
                args,
                count,
                seed,
                format,
                ..
            } => {
                assert_eq!(function, "biasFromBool");
                assert_eq!(args, vec![json!(true), json!({"k": [1, 2]})]);
                assert_eq!(count, 5);
                assert_eq!(seed, Some(3));
                assert_eq!(format, "text");
            }
            Commands::Prove { .. } => panic!("expected sample"),
        }
    }

    #[test]
    fn rejects_non_json_arguments() {
        let parsed = Cli::try_parse_from([
            "algprob",
            "sample",
            "--connect",
            "x:1",
            "f",
            "--arg",
            "not json",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn parses_prove_overrides() {
        let cli = Cli::try_parse_from([
            "algprob",
            "prove",
            "--connect",
            "x:1",
            "proofs.json",
            "--max-passes",
            "12",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Prove {
                proofs,
                max_passes,
                tolerance,
                format,
                ..
            } => {
                assert_eq!(proofs, PathBuf::from("proofs.json"));
                assert_eq!(max_passes, Some(12));
                assert_eq!(tolerance, None);
                assert_eq!(OutputFormat::parse(&format).unwrap(), OutputFormat::Json);
            }
            Commands::Sample { .. } => panic!("expected prove"),
        }
    }

    #[test]
    fn output_format_parse() {
        assert_eq!(OutputFormat::parse(" TEXT ").unwrap(), OutputFormat::Text);
        assert!(OutputFormat::parse("yaml").is_err());
    }

    #[test]
    fn certain_coin_always_samples_true() {
        let mut model = FunctionModel::builder().build();
        let outcomes =
            sample_outcomes(&mut model, "bernouli", &[json!(1.0)], 50, Some(7)).unwrap();
        assert_eq!(outcomes.len(), 50);
        assert!(outcomes.iter().all(|o| o == &vec![json!(true)]));
        assert_eq!(render_outcome(&outcomes[0]), "true");
        assert_eq!(model.live_objects(), 0);
    }

    #[test]
    fn compound_draws_release_what_they_own() {
        let mut model = FunctionModel::builder()
            .function("pair", |b, args| {
                b.call("bernouli", [Arg::literal(args[0].clone())], ["x"])?;
                Ok(vec![Arg::local("x"), Arg::literal("tag")])
            })
            .build();
        let outcomes = sample_outcomes(&mut model, "pair", &[json!(0.0)], 5, Some(1)).unwrap();
        assert!(outcomes.iter().all(|o| o == &vec![json!(false), json!("tag")]));
        assert_eq!(render_outcome(&outcomes[0]), "false \"tag\"");
        assert_eq!(model.live_objects(), 0);
    }

    #[test]
    fn nested_draws_through_checked_model_leave_no_objects() {
        let model = FunctionModel::builder()
            .function("biasFromBool", |_b, args| {
                let high = args[0].as_bool().unwrap_or(false);
                Ok(vec![Arg::literal(if high { 0.15 } else { 0.85 })])
            })
            .function("decideBias", |b, args| {
                b.call("bernouli", [Arg::literal(args[0].clone())], ["coin"])?;
                b.call("biasFromBool", [Arg::local("coin")], ["bias"])?;
                Ok(vec![Arg::local("bias")])
            })
            .build();
        let mut model = CheckedModel::new(model);
        let outcomes =
            sample_outcomes(&mut model, "decideBias", &[json!(0.3)], 100, Some(5)).unwrap();
        assert_eq!(outcomes.len(), 100);
        assert!(outcomes
            .iter()
            .all(|o| o == &vec![json!(0.15)] || o == &vec![json!(0.85)]));
        assert_eq!(model.inner().live_objects(), 0);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let draw = || {
            let mut model = FunctionModel::builder().build();
            sample_outcomes(&mut model, "bernouli", &[json!(0.5)], 40, Some(11)).unwrap()
        };
        assert_eq!(draw(), draw());
    }

    #[test]
    fn prove_report_exports_labels_and_bounds() {
        let mut model = FunctionModel::builder().build();
        let report = prove_report(
            &mut model,
            r#"[{"label": {"function": "bernouli", "parameters": [0.5], "result": [true]}}]"#,
            SolverConfig::default(),
        )
        .unwrap();
        assert_eq!(report.proofs.len(), 1);
        let proved = &report.proofs[0];
        assert_eq!(proved.label.parameters, vec![json!(0.5)]);
        assert_eq!(proved.label.result, vec![json!(true)]);
        assert_abs_diff_eq!(proved.log_prob.unwrap(), 0.5f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(proved.probability, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn unproved_dependency_reports_null_log_prob() {
        let mut model = nested_model();
        let report = prove_report(
            &mut model,
            r#"[{"label": {"function": "outer", "result": [true]}, "mappings": [{"x": true}]}]"#,
            SolverConfig::default(),
        )
        .unwrap();
        assert_eq!(report.proofs[0].log_prob, None);
        assert_eq!(report.proofs[0].probability, 0.0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["proofs"][0]["log_prob"], serde_json::Value::Null);
        assert_eq!(json["stats"]["labels"], json!(1));
    }

    #[test]
    fn proof_errors_carry_context() {
        let mut model = nested_model();
        let err = prove_report(&mut model, "[{]", SolverConfig::default()).unwrap_err();
        assert!(err.to_string().contains("failed to load proofs"));
    }
}
