//! kforge CLI
//!
//! Entry point for the `kforge` command-line tool.

use clap::{Args, Parser, Subcommand};
use kforge::config::{default_host_path, EffectiveSettings};
use kforge::signal::SignalHandler;
use kforge::{FeatureState, Mode, Pipeline, PipelineOptions, ProcessRunner, Toggles, Workspace};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kforge")]
#[command(about = "Kernel build orchestration", version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// Workspace directory holding source trees and out/ (default: current directory)
    #[arg(long, short = 'w', global = true)]
    workspace: Option<PathBuf>,

    /// Settings file used instead of <workspace>/kforge.toml
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync, integrate, configure, build and package
    Build {
        /// Skip the privilege-management overlay
        #[arg(long)]
        no_ksu: bool,

        /// Skip the filesystem-hiding overlay
        #[arg(long)]
        no_susfs: bool,

        /// Do not produce a flashable archive
        #[arg(long)]
        no_zip: bool,

        /// Feature combination (full, ksu-only, susfs-only, stock)
        #[arg(long, default_value = "full")]
        mode: Mode,

        /// Parallel make jobs
        #[arg(long, short = 'j')]
        jobs: Option<usize>,

        /// Device codename
        #[arg(long)]
        device: Option<String>,
    },

    /// Clone or update every source tree
    Sync,

    /// Show source trees and the last run
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove build outputs and logs, keeping source trees
    Clean,

    /// Print the effective settings and where they came from
    Config {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let code = match cli.command {
        Commands::Build {
            no_ksu,
            no_susfs,
            no_zip,
            mode,
            jobs,
            device,
        } => {
            let toggles = Toggles {
                no_ksu,
                no_susfs,
                no_zip,
            };
            run_build(&cli.global, mode, toggles, jobs, device)
        }
        Commands::Sync => run_sync(&cli.global),
        Commands::Status { json } => run_status(&cli.global, json),
        Commands::Clean => run_clean(&cli.global),
        Commands::Config { json } => run_config(&cli.global, json),
    };

    process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("KFORGE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));
    let filter = if verbose {
        filter.add_directive(tracing::level_filters::LevelFilter::DEBUG.into())
    } else {
        filter
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn workspace(global: &GlobalArgs) -> Workspace {
    let root = global
        .workspace
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    Workspace::new(root)
}

fn load_settings(
    global: &GlobalArgs,
    ws: &Workspace,
    overrides: Option<serde_json::Value>,
) -> Result<EffectiveSettings, String> {
    let workspace_file = match global.config {
        Some(ref path) if !path.exists() => {
            return Err(format!("config file {} not found", path.display()));
        }
        Some(ref path) => path.clone(),
        None => ws.settings_path(),
    };
    let host = default_host_path();
    EffectiveSettings::build(host.as_deref(), Some(&workspace_file), overrides)
        .map_err(|e| e.to_string())
}

fn pipeline(
    global: &GlobalArgs,
    overrides: Option<serde_json::Value>,
    features: impl FnOnce(&kforge::Settings) -> FeatureState,
) -> Result<(Pipeline, SignalHandler), i32> {
    let ws = workspace(global);
    let effective = load_settings(global, &ws, overrides).map_err(|e| {
        eprintln!("Error loading settings: {}", e);
        1
    })?;
    let features = features(&effective.settings);

    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        tracing::warn!(error = %e, "could not install signal handler");
    }

    let options = PipelineOptions {
        workspace: ws,
        settings: effective.settings,
        features,
    };
    let pipeline = Pipeline::new(Arc::new(ProcessRunner::new()), handler.state(), options);
    Ok((pipeline, handler))
}

fn run_build(
    global: &GlobalArgs,
    mode: Mode,
    toggles: Toggles,
    jobs: Option<usize>,
    device: Option<String>,
) -> i32 {
    let mut overrides = serde_json::Map::new();
    if let Some(jobs) = jobs {
        overrides.insert("build".into(), json!({ "jobs": jobs }));
    }
    if let Some(codename) = device {
        overrides.insert("device".into(), json!({ "codename": codename }));
    }
    let overrides = (!overrides.is_empty()).then(|| serde_json::Value::Object(overrides));

    let (pipeline, _handler) =
        match pipeline(global, overrides, |s| FeatureState::resolve(s, mode, toggles)) {
            Ok(p) => p,
            Err(code) => return code,
        };

    match pipeline.run() {
        Ok(summary) => {
            println!("{}", summary.human_summary);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!(
                "Run summary: {}",
                pipeline.options().workspace.summary_path().display()
            );
            e.exit_code()
        }
    }
}

fn run_sync(global: &GlobalArgs) -> i32 {
    let (pipeline, _handler) =
        match pipeline(global, None, |s| FeatureState::resolve(s, Mode::Full, Toggles::default())) {
            Ok(p) => p,
            Err(code) => return code,
        };

    match pipeline.sync_all() {
        Ok(report) => {
            for tree in &report.trees {
                println!("  {:<10} {}", tree.name, tree.state);
            }
            for warning in &report.warnings {
                println!("  warning: {}", warning);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run_status(global: &GlobalArgs, json_output: bool) -> i32 {
    let (pipeline, _handler) =
        match pipeline(global, None, |s| FeatureState::resolve(s, Mode::Full, Toggles::default())) {
            Ok(p) => p,
            Err(code) => return code,
        };
    let status = pipeline.status();

    if json_output {
        return match serde_json::to_string_pretty(&status) {
            Ok(json) => {
                println!("{}", json);
                0
            }
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                1
            }
        };
    }

    println!("Workspace: {}\n", status.workspace.display());
    for tree in &status.trees {
        let presence = if tree.present { "present" } else { "absent" };
        match tree.revision {
            Some(ref rev) => println!("  {:<10} {:<8} {}", tree.name, presence, rev),
            None => println!("  {:<10} {}", tree.name, presence),
        }
    }
    if let Some(ref run) = status.last_run {
        println!("\nLast run {} ({}):", run.run_id, run.finished_at.format("%Y-%m-%d %H:%M"));
        for stage in &run.stages {
            println!("  {:<10} {}", stage.stage, stage.status);
        }
        println!("  {}", run.human_summary);
    }
    0
}

fn run_clean(global: &GlobalArgs) -> i32 {
    let ws = workspace(global);
    match ws.clean() {
        Ok(report) => {
            match report.removed {
                Some(ref path) => println!(
                    "Removed {} ({} files, {} bytes)",
                    path.display(),
                    report.files_removed,
                    report.bytes_removed
                ),
                None => println!("Nothing to clean."),
            }
            0
        }
        Err(e) => {
            eprintln!("Error cleaning {}: {}", ws.out_dir().display(), e);
            1
        }
    }
}

fn run_config(global: &GlobalArgs, json_output: bool) -> i32 {
    let ws = workspace(global);
    let effective = match load_settings(global, &ws, None) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return 1;
        }
    };

    if json_output {
        match effective.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                return 1;
            }
        }
    } else {
        print!("{}", effective.to_human());
    }
    0
}
