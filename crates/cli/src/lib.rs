//! codeloom CLI
//!
//! A much smaller analog of the teacher's `cli` crate: a `clap::Parser`
//! derived `Args`/`Command` enum dispatching into `codeloom_core`, with
//! logging initialized to stderr before anything else and exit codes
//! mapped from `codeloom_core::Error::exit_code()` (§6).
//!
//! Each data-producing subcommand reads/writes JSON so they compose as a
//! pipeline: `codeloom find-duplicates ... | codeloom rank | codeloom apply`.

use std::io::{Read, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use codeloom_core::applicator::{ApplyOpts, Applicator};
use codeloom_core::backup::BackupStore;
use codeloom_core::cache::QueryCache;
use codeloom_core::config::{Config, ConstructType};
use codeloom_core::detector::{DetectorParams, DuplicationDetector};
use codeloom_core::executor::MatcherExecutor;
use codeloom_core::ranker::Ranker;
use codeloom_core::types::{Candidate, DuplicateGroup};
use codeloom_core::variation::VariationAnalyzer;
use codeloom_core::Error;

#[derive(Debug, Parser)]
#[command(name = "codeloom", about = "Structural duplication detection, ranking, and safe extraction")]
pub struct Args {
    /// Path to a `codeloom.toml` config file; defaults unchanged if absent.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project root to operate against; overrides the config file's value.
    #[arg(long, global = true)]
    pub project_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the MCP server over stdio.
    McpServer,
    /// Detect duplicate code groups (C4). Writes a JSON array of groups to stdout.
    FindDuplicates(FindDuplicatesArgs),
    /// Analyze variation and score groups into ranked candidates (C5/C6).
    Rank(RankArgs),
    /// Apply extraction candidates transactionally (C9).
    Apply(ApplyArgs),
    /// Restore project files from a backup snapshot (C3).
    Rollback(RollbackArgs),
    /// Check that the structural matcher binary is on `PATH`.
    Doctor,
}

#[derive(Debug, Parser)]
pub struct FindDuplicatesArgs {
    /// Source language, e.g. "python".
    #[arg(long)]
    pub language: String,
    /// Path to search; defaults to the project root.
    #[arg(long)]
    pub target_path: Option<PathBuf>,
    #[arg(long)]
    pub min_similarity: Option<f64>,
    #[arg(long)]
    pub min_lines: Option<u32>,
    /// "function_definition" | "class_definition" | "block".
    #[arg(long)]
    pub construct_type: Option<String>,
    #[arg(long = "exclude")]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct RankArgs {
    /// Read groups from a file instead of stdin.
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// Cap on returned candidates.
    #[arg(long)]
    pub max: Option<usize>,
}

#[derive(Debug, Parser)]
pub struct ApplyArgs {
    /// Read candidates from a file instead of stdin.
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// Perform a real write instead of previewing (default is a dry run).
    #[arg(long)]
    pub commit: bool,
    #[arg(long)]
    pub target_file: Option<PathBuf>,
    #[arg(long)]
    pub language: Option<String>,
}

#[derive(Debug, Parser)]
pub struct RollbackArgs {
    #[arg(long)]
    pub backup_id: String,
}

/// Load config from `args.config` (default `codeloom.toml` at the project
/// root if present, else built-in defaults), then apply CLI overrides. The
/// config file takes lower precedence than explicit CLI flags.
pub fn load_config(args: &Args) -> Config {
    let mut config = match &args.config {
        Some(path) => Config::load(path).unwrap_or_else(|e| {
            tracing::warn!("failed to load config at {}: {e}; using defaults", path.display());
            Config::default()
        }),
        None => {
            let default_path = PathBuf::from("codeloom.toml");
            if default_path.exists() {
                Config::load(&default_path).unwrap_or_else(|e| {
                    tracing::warn!("failed to load {}: {e}; using defaults", default_path.display());
                    Config::default()
                })
            } else {
                Config::default()
            }
        }
    };
    if let Some(project_root) = &args.project_root {
        config.project_root = project_root.clone();
    }
    config
}

fn executor(config: &Config) -> MatcherExecutor {
    MatcherExecutor::new(config.executor.matcher_binary.clone())
}

fn resolve_target(config: &Config, target_path: &Option<PathBuf>) -> PathBuf {
    match target_path {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => config.project_root.join(p),
        None => config.project_root.clone(),
    }
}

fn read_json_input<T: for<'de> serde::Deserialize<'de>>(input: &Option<PathBuf>) -> anyhow::Result<T> {
    let text = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&text)?)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    writeln!(std::io::stdout(), "{text}")?;
    Ok(())
}

pub async fn run_find_duplicates_command(args: &FindDuplicatesArgs, config: &Config) -> i32 {
    let construct_type = match &args.construct_type {
        Some(s) => match serde_json::from_value::<ConstructType>(serde_json::Value::String(s.clone())) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: invalid construct_type {s:?}: {e}");
                return Error::InvalidInput(String::new()).exit_code();
            }
        },
        None => config.detector.construct_type,
    };
    let params = DetectorParams {
        min_similarity: args.min_similarity.unwrap_or(config.detector.min_similarity),
        min_lines: args.min_lines.unwrap_or(config.detector.min_lines),
        construct_type,
        exclude_patterns: if args.exclude_patterns.is_empty() {
            config.detector.exclude_patterns.clone()
        } else {
            args.exclude_patterns.clone()
        },
    };
    let target = resolve_target(config, &args.target_path);
    let detector = DuplicationDetector::new(executor(config));
    match detector.find_duplicates(&target, &args.language, &params).await {
        Ok(groups) => {
            if let Err(e) = print_json(&groups) {
                eprintln!("Error writing output: {e}");
                return 1;
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}

pub async fn run_rank_command(args: &RankArgs, _config: &Config, cache: &QueryCache) -> i32 {
    let groups: Vec<DuplicateGroup> = match read_json_input(&args.input) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: invalid input: {e}");
            return Error::InvalidInput(String::new()).exit_code();
        }
    };
    let analyzer = VariationAnalyzer::new();
    let inputs = groups
        .into_iter()
        .map(|group| {
            let plan = analyzer.analyze(&group);
            (group, plan, None)
        })
        .collect();
    let candidates = Ranker::new(cache).rank(inputs, args.max);
    if let Err(e) = print_json(&candidates) {
        eprintln!("Error writing output: {e}");
        return 1;
    }
    0
}

pub async fn run_apply_command(args: &ApplyArgs, config: &Config) -> i32 {
    let candidates: Vec<Candidate> = match read_json_input(&args.input) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: invalid input: {e}");
            return Error::InvalidInput(String::new()).exit_code();
        }
    };
    let default_opts = ApplyOpts::default();
    let opts = ApplyOpts {
        dry_run: !args.commit,
        target_file: args.target_file.clone().unwrap_or(default_opts.target_file),
        language: args.language.clone().unwrap_or(default_opts.language),
    };
    let applicator = Applicator::new(config.project_root.clone(), config.backup_root(), executor(config));
    match applicator.apply(&candidates, &opts).await {
        Ok(report) => {
            if let Err(e) = print_json(&report) {
                eprintln!("Error writing output: {e}");
                return 1;
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}

pub async fn run_rollback_command(args: &RollbackArgs, config: &Config) -> i32 {
    let backups = BackupStore::new(config.backup_root(), config.project_root.clone());
    match backups.restore(&args.backup_id) {
        Ok(report) => {
            if let Err(e) = print_json(&report) {
                eprintln!("Error writing output: {e}");
                return 1;
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}

/// Checks the matcher binary is resolvable on `PATH`, mirroring the
/// teacher's `which`-based binary resolution.
pub fn run_doctor_command(config: &Config) -> i32 {
    match executor(config).resolve_binary() {
        Ok(path) => {
            println!("ok: matcher binary {} resolved at {}", config.executor.matcher_binary, path.display());
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}
