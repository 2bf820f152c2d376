//! Subcommand dispatch: `compare`/`locate`/`minimize`/`batch`/`serve`/
//! `dump-unit`.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::analysis::{Analyzer, UnitAnalysis};
use crate::cfg::CfgBuilder;
use crate::comparator::Comparator;
use crate::config::Config;
use crate::error::{Result, VerifyError};
use crate::instruction::normalize_all;
use crate::loader::{LoadedArtifact, Loader};
use crate::localizer::Localizer;
use crate::minimizer::{
    ddmin, find_enclosing_statement, is_future_import, module_docstring_index, rebuild_source,
    same_unit_insts, split_top_level_statements,
};
use crate::opcode_table::opcode_table;
use crate::report::{Manifest, ReportAggregator};
use crate::toolchain::ToolchainAdapter;

#[derive(Parser, Debug)]
#[command(name = "pybc-verify")]
#[command(author = "pybc-verify contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verify that a reconstructed Python source is bytecode-equivalent to an original artifact")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to an optional pybc-verify.toml config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit tracing spans as JSON instead of pretty text.
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Enable debug-level tracing.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compare an original artifact against a recompiled candidate source.
    Compare {
        #[arg(long)]
        orig: PathBuf,
        #[arg(long)]
        candidate_source: PathBuf,
        #[arg(long)]
        debug_filename: String,
        #[arg(long)]
        json: bool,
    },
    /// Localize the first diverging instruction for one unit path.
    Locate {
        #[arg(long)]
        orig: PathBuf,
        #[arg(long)]
        candidate_source: PathBuf,
        #[arg(long)]
        debug_filename: String,
        #[arg(long)]
        path: String,
        #[arg(long, default_value_t = 8)]
        radius: usize,
    },
    /// Delta-debug the candidate source to a minimal reproduction of a mismatch.
    Minimize {
        #[arg(long)]
        orig: PathBuf,
        #[arg(long)]
        candidate_source: PathBuf,
        #[arg(long)]
        debug_filename: String,
        #[arg(long)]
        path: String,
        #[arg(long, default_value_t = 200)]
        max_iter: usize,
    },
    /// Run many comparisons from an explicit `{orig, src}` manifest.
    Batch {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long, default_value_t = 10)]
        worst: usize,
    },
    /// Serve the Comparator over HTTP.
    Serve {
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
    /// Dump one code object's raw instructions and full unit analysis.
    DumpUnit {
        #[arg(long)]
        orig: PathBuf,
        #[arg(long)]
        path: String,
    },
}

pub fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = if verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

/// Resolve a dotted unit path, optionally suffixed `#k` to pick the k-th
/// occurrence among duplicates (e.g. two `def f` under opposing branches).
fn resolve_unit<'a>(units: &'a [UnitAnalysis], path_spec: &str) -> Result<&'a UnitAnalysis> {
    let (path, index) = match path_spec.split_once('#') {
        Some((p, idx)) => (
            p,
            idx.parse::<usize>()
                .map_err(|_| VerifyError::PathMissing(path_spec.to_string()))?,
        ),
        None => (path_spec, 0),
    };
    let matches: Vec<&UnitAnalysis> = units.iter().filter(|u| u.path == path).collect();
    if matches.is_empty() {
        return Err(VerifyError::PathMissing(path.to_string()));
    }
    if matches.len() > 1 && path_spec.find('#').is_none() {
        return Err(VerifyError::PathAmbiguous(path.to_string()));
    }
    matches
        .get(index)
        .copied()
        .ok_or_else(|| VerifyError::PathMissing(path_spec.to_string()))
}

async fn load_and_compile(
    toolchain: &ToolchainAdapter,
    orig: &Path,
    candidate_source: &Path,
    debug_filename: &str,
) -> Result<(LoadedArtifact, LoadedArtifact)> {
    let orig_artifact = Loader::load(orig)?;
    let resolved = toolchain.locator.resolve_or_current(orig_artifact.version);

    let scratch = tempfile::tempdir().map_err(VerifyError::Io)?;
    let compiled_path = scratch.path().join("candidate.pyc");
    let source = tokio::fs::read_to_string(candidate_source)
        .await
        .map_err(VerifyError::Io)?;
    toolchain
        .compile_source(&resolved.path, &source, &compiled_path, debug_filename)
        .await?;
    let comp_artifact = Loader::load(&compiled_path)?;
    Ok((orig_artifact, comp_artifact))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| VerifyError::InternalInvariant(e.to_string()))?;
    println!("{text}");
    Ok(())
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    init_tracing(args.verbose, args.log_format);
    let config = Config::load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Compare { orig, candidate_source, debug_filename, json } => {
            let toolchain = ToolchainAdapter {
                locator: crate::toolchain::InterpreterLocator {
                    explicit_path: config.interpreter_path.clone(),
                    install_root: config.install_root.clone(),
                },
                timeout: std::time::Duration::from_secs(config.timeout_secs),
            };

            let report = match load_and_compile(&toolchain, &orig, &candidate_source, &debug_filename).await {
                Ok((orig_artifact, comp_artifact)) => {
                    let table_orig = opcode_table(orig_artifact.version, orig_artifact.implementation);
                    let table_comp = opcode_table(comp_artifact.version, comp_artifact.implementation);
                    let orig_units = Analyzer::new(&table_orig).analyze(&orig_artifact.root);
                    let comp_units = Analyzer::new(&table_comp).analyze(&comp_artifact.root);

                    let comparator = Comparator::new(config.thresholds);
                    comparator.compare(&orig_units, &comp_units, orig_artifact.version, comp_artifact.version)
                }
                Err(e) => crate::comparator::error_report(config.thresholds, None, &e),
            };

            if json {
                print_json(&report)?;
            } else {
                tracing::info!(verdict = ?report.verdict, units = report.summary.units_compared, "compare finished");
                println!("verdict: {:?}", report.verdict);
                println!("units compared: {}", report.summary.units_compared);
                println!("avg seq ratio: {:.4}", report.summary.avg_seq_ratio);
                if let Some(err) = &report.summary.error {
                    println!("error: {err}");
                }
            }
            Ok(())
        }

        Command::Locate { orig, candidate_source, debug_filename, path, radius } => {
            let toolchain = ToolchainAdapter::default();
            let outcome: Result<()> =
                match load_and_compile(&toolchain, &orig, &candidate_source, &debug_filename).await {
                    Ok((orig_artifact, comp_artifact)) => {
                        let table_orig = opcode_table(orig_artifact.version, orig_artifact.implementation);
                        let table_comp = opcode_table(comp_artifact.version, comp_artifact.implementation);
                        let orig_units = Analyzer::new(&table_orig).analyze(&orig_artifact.root);
                        let comp_units = Analyzer::new(&table_comp).analyze(&comp_artifact.root);

                        let orig_unit = resolve_unit(&orig_units, &path)?;
                        let comp_unit = resolve_unit(&comp_units, &path)?;

                        let orig_cfg = CfgBuilder::build(&normalize_all(&orig_unit.insts, &table_orig));
                        let comp_cfg = CfgBuilder::build(&normalize_all(&comp_unit.insts, &table_comp));

                        let localizer = Localizer::new(radius);
                        let localization = localizer.locate(&orig_unit.insts, &comp_unit.insts, &orig_cfg, &comp_cfg);
                        print_json(&localization)
                    }
                    Err(e) => print_json(&ErrorOutcome { error: e.to_string() }),
                };
            Ok(outcome?)
        }

        Command::Minimize { orig, candidate_source, debug_filename, path, max_iter } => {
            let source = tokio::fs::read_to_string(&candidate_source).await.map_err(VerifyError::Io)?;
            let statements = split_top_level_statements(&source);

            let mut always_keep: std::collections::BTreeSet<usize> = std::collections::BTreeSet::new();
            if let Some(i) = module_docstring_index(&statements) {
                always_keep.insert(i);
            }
            for (i, s) in statements.iter().enumerate() {
                if is_future_import(s) {
                    always_keep.insert(i);
                }
            }
            let first_component = path.split('.').nth(1).unwrap_or(&path).to_string();
            if let Some(i) = find_enclosing_statement(&statements, &first_component) {
                always_keep.insert(i);
            }
            let removable: std::collections::BTreeSet<usize> = (0..statements.len())
                .filter(|i| !always_keep.contains(i))
                .collect();
            let total_statements = statements.len();

            let orig_artifact = match Loader::load(&orig) {
                Ok(a) => a,
                Err(e) => return Ok(print_json(&ErrorOutcome { error: e.to_string() })?),
            };
            let table_orig = opcode_table(orig_artifact.version, orig_artifact.implementation);
            let orig_units = Analyzer::new(&table_orig).analyze(&orig_artifact.root);
            let orig_insts = resolve_unit(&orig_units, &path)?.insts.clone();

            let toolchain = ToolchainAdapter::default();
            let resolved = toolchain.locator.resolve_or_current(orig_artifact.version);
            let path_for_unit = path.clone();

            let (kept, stats) = ddmin(always_keep, removable, max_iter, move |candidate| {
                let statements = statements.clone();
                let resolved = resolved.clone();
                let timeout = toolchain.timeout;
                let debug_filename = debug_filename.clone();
                let orig_insts = orig_insts.clone();
                let path_for_unit = path_for_unit.clone();
                async move {
                    let candidate_source = rebuild_source(&statements, &candidate);
                    let Ok(scratch) = tempfile::tempdir() else { return false };
                    let compiled_path = scratch.path().join("candidate.pyc");
                    let adapter = ToolchainAdapter {
                        locator: crate::toolchain::InterpreterLocator::default(),
                        timeout,
                    };
                    if adapter
                        .compile_source(&resolved.path, &candidate_source, &compiled_path, &debug_filename)
                        .await
                        .is_err()
                    {
                        return false;
                    }
                    let Ok(comp_artifact) = Loader::load(&compiled_path) else { return false };
                    let table_comp = opcode_table(comp_artifact.version, comp_artifact.implementation);
                    let comp_units = Analyzer::new(&table_comp).analyze(&comp_artifact.root);
                    let Ok(comp_unit) = resolve_unit(&comp_units, &path_for_unit) else { return false };
                    same_unit_insts(&orig_insts, &comp_unit.insts)
                }
            })
            .await;

            tracing::info!(iterations = stats.iterations, removed = stats.removed, "minimization finished");
            println!("kept {} of {} statements ({} iterations)", kept.len(), total_statements, stats.iterations);
            Ok(())
        }

        Command::Batch { manifest, worst } => {
            let text = tokio::fs::read_to_string(&manifest).await.map_err(VerifyError::Io)?;
            let manifest: Manifest = serde_json::from_str(&text)
                .map_err(|e| VerifyError::InternalInvariant(e.to_string()))?;

            let toolchain = ToolchainAdapter::default();
            let comparator = Comparator::new(config.thresholds);
            let mut aggregator = ReportAggregator::new(worst);

            for entry in manifest.entries {
                let label = entry.label.clone().unwrap_or_else(|| entry.orig.clone());
                let result = async {
                    let (orig_artifact, comp_artifact) = load_and_compile(
                        &toolchain,
                        Path::new(&entry.orig),
                        Path::new(&entry.src),
                        &entry.orig,
                    )
                    .await?;
                    let table_orig = opcode_table(orig_artifact.version, orig_artifact.implementation);
                    let table_comp = opcode_table(comp_artifact.version, comp_artifact.implementation);
                    let orig_units = Analyzer::new(&table_orig).analyze(&orig_artifact.root);
                    let comp_units = Analyzer::new(&table_comp).analyze(&comp_artifact.root);
                    Ok::<_, VerifyError>(comparator.compare(&orig_units, &comp_units, orig_artifact.version, comp_artifact.version))
                }
                .await;

                match result {
                    Ok(report) => aggregator.record(label, &report),
                    Err(e) => aggregator.record_error(label, e.to_string()),
                }
            }

            print_json(&aggregator.finish())
        }

        Command::Serve { port } => crate::server::run_server(port, config.thresholds).await,

        Command::DumpUnit { orig, path } => {
            let orig_artifact = Loader::load(&orig)?;
            let table = opcode_table(orig_artifact.version, orig_artifact.implementation);
            let units = Analyzer::new(&table).analyze(&orig_artifact.root);
            let unit = resolve_unit(&units, &path)?;
            print_json(&UnitDump {
                path: unit.path.clone(),
                norm_ops: unit.norm_ops.clone(),
                block_count: unit.blocks.len(),
                edge_sig_counts: unit.edge_sig_counts.clone(),
            })
        }
    }
}

#[derive(Serialize)]
struct UnitDump {
    path: String,
    norm_ops: Vec<String>,
    block_count: usize,
    edge_sig_counts: std::collections::BTreeMap<String, u32>,
}

/// JSON shape for a toolchain/loader failure on a subcommand that otherwise
/// prints a single structured payload, so `locate`/`minimize` never exit via
/// a bare process error on a recompilation or load failure.
#[derive(Serialize)]
struct ErrorOutcome {
    error: String,
}
