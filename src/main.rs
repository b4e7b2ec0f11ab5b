//! QAX - Quality assurance checks for hydrographic survey data
//!
//! Command line entry point.
//!
//! # Overview
//!
//! - `qax profiles`: list the loaded profiles and their check tools
//! - `qax init`: create or update a QA JSON document for a profile
//! - `qax run`: run a profile's check tools against a document, in a worker
//!   process by default
//! - `qax summary`: print the cross-file summary of a document
//! - `qax worker`: worker entry point used by isolated runs (hidden)
//!
//! Settings come from an optional `qax.{yaml,toml,json}` in the working
//! directory and `QAX_*` environment variables; command line options win.

use anyhow::{Context, Result, anyhow, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use qax::executor::isolated::{IsolatedCheckExecutor, WorkerRequest};
use qax::plugins::CheckToolOptions;
use qax::{
    APP_NAME, CheckExecutor, ConfigModel, ExecutorEvent, ExecutorStatus, FileAttachment,
    PluginCatalog, PluginRegistry, ProfilePlugins, QaDocument, QaxSettings, SummaryTable, VERSION,
};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "qax", version)]
#[command(about = "Quality assurance checks for hydrographic survey data", long_about = None)]
struct Cli {
    /// Directory holding profile documents (overrides settings)
    #[arg(long, global = true)]
    config_dir: Option<Utf8PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List profiles, their check tools and plugin load failures
    Profiles,
    /// Create or update a QA JSON document for a profile
    Init {
        #[arg(long)]
        profile: String,
        /// Document to write; updated in place if it exists
        #[arg(long)]
        output: Utf8PathBuf,
        /// Input file as GROUP=PATH, e.g. "Raw Files=/data/line1.all"
        #[arg(long = "file", value_parser = parse_file_arg)]
        files: Vec<FileAttachment>,
        /// Specification preset applied to check parameters
        #[arg(long)]
        specification: Option<String>,
    },
    /// Run the profile's check tools against a document
    Run {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        document: Utf8PathBuf,
        /// Where to save the result (defaults to the input document)
        #[arg(long)]
        output: Option<Utf8PathBuf>,
        /// Run check tools in this process instead of a worker
        #[arg(long)]
        in_process: bool,
        /// Stop the worker after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Check tool option as CLASS_ID:NAME=VALUE (VALUE parsed as JSON if possible)
        #[arg(long = "option", value_parser = parse_option_arg)]
        options: Vec<ToolOption>,
    },
    /// Print the summary table of a document
    Summary {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        document: Utf8PathBuf,
        /// Print JSON instead of tab separated text
        #[arg(long)]
        json: bool,
    },
    /// Serve one isolated run over stdin/stdout
    #[command(hide = true)]
    Worker,
}

fn parse_file_arg(value: &str) -> Result<FileAttachment, String> {
    let (group, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected GROUP=PATH, got '{value}'"))?;
    if group.is_empty() || path.is_empty() {
        return Err(format!("expected GROUP=PATH, got '{value}'"));
    }
    Ok(FileAttachment::new(path, group))
}

/// One `--option` value.
#[derive(Debug, Clone)]
struct ToolOption {
    class_id: String,
    name: String,
    value: serde_json::Value,
}

fn parse_option_arg(value: &str) -> Result<ToolOption, String> {
    let (key, raw) = value
        .split_once('=')
        .ok_or_else(|| format!("expected CLASS_ID:NAME=VALUE, got '{value}'"))?;
    let (class_id, name) = key
        .split_once(':')
        .ok_or_else(|| format!("expected CLASS_ID:NAME=VALUE, got '{value}'"))?;
    let parsed = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok(ToolOption {
        class_id: class_id.to_string(),
        name: name.to_string(),
        value: parsed,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = QaxSettings::load(Utf8Path::new("."))?;
    if let Some(dir) = cli.config_dir.clone() {
        settings.profile_dir = dir;
    }
    let debug = cli.debug || settings.debug;

    if matches!(cli.command, Commands::Worker) {
        qax::logging::setup_worker_logging(debug)?;
        let status = qax::worker::run_worker(&PluginCatalog::builtin());
        tracing::info!("Worker finished: {}", status);
        return Ok(());
    }

    let _guard = qax::logging::setup_logging_with_console(&settings.log_dir, "qax", debug, true)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let config = ConfigModel::load_global(&settings.profile_dir)
        .with_context(|| format!("Failed to load profiles from {}", settings.profile_dir))?;
    let registry = PluginRegistry::load_global(&config, &PluginCatalog::builtin());

    match cli.command {
        Commands::Profiles => list_profiles(&config, &registry),
        Commands::Init {
            profile,
            output,
            files,
            specification,
        } => init_document(&config, &registry, &profile, &output, &files, specification.as_deref()),
        Commands::Run {
            profile,
            document,
            output,
            in_process,
            timeout_secs,
            options,
        } => {
            let output = output.unwrap_or_else(|| document.clone());
            let timeout = timeout_secs.map(Duration::from_secs).or(settings.worker_timeout());
            let run = RunArgs {
                profile,
                document,
                output,
                options: group_options(options),
            };
            if in_process {
                run_in_process(&config, &registry, run)
            } else {
                run_isolated(&config, &registry, &settings, run, timeout)
            }
        }
        Commands::Summary {
            profile,
            document,
            json,
        } => print_summary(&config, &registry, &profile, &document, json),
        Commands::Worker => Ok(()),
    }
}

fn profile_plugins(config: &ConfigModel, registry: &PluginRegistry, name: &str) -> Result<ProfilePlugins> {
    let profile = config
        .profile(name)
        .ok_or_else(|| anyhow!("Profile '{}' not found in {}", name, config.config_dir()))?;
    Ok(ProfilePlugins::new(registry.get_profile_plugins(profile)))
}

fn list_profiles(config: &ConfigModel, registry: &PluginRegistry) -> Result<()> {
    println!("Profiles ({})", config.profiles().len());
    for profile in config.profiles() {
        println!("  {} - {}", profile.name, profile.description);
        for plugin in registry.get_profile_plugins(profile) {
            println!("    {} [{}] {} checks", plugin.name(), plugin.class_id(), plugin.checks().len());
        }
        for spec in &profile.specifications {
            println!("    specification: {}", spec.name);
        }
    }

    if !registry.failures().is_empty() {
        println!("Load failures ({})", registry.failures().len());
        for failure in registry.failures() {
            println!(
                "  {} / {} ({}): {}",
                failure.profile, failure.check_tool, failure.plugin_class, failure.error
            );
        }
    }
    Ok(())
}

fn init_document(
    config: &ConfigModel,
    registry: &PluginRegistry,
    profile_name: &str,
    output: &Utf8Path,
    files: &[FileAttachment],
    specification: Option<&str>,
) -> Result<()> {
    let plugins = profile_plugins(config, registry, profile_name)?;
    let mut document = if output.exists() {
        QaDocument::load(output)?
    } else {
        QaDocument::new()
    };

    let created = plugins.update_qa_json(&mut document);
    let attached = plugins.update_qa_json_input_files(&mut document, files);

    if let Some(name) = specification {
        let spec = config
            .profile(profile_name)
            .and_then(|p| p.specification(name))
            .ok_or_else(|| anyhow!("Specification '{}' not found in profile '{}'", name, profile_name))?;
        plugins.apply_specification(&mut document, spec);
    }

    document.save(output)?;
    println!(
        "Wrote {}: {} new checks, {} file attachments",
        output, created, attached
    );
    Ok(())
}

struct RunArgs {
    profile: String,
    document: Utf8PathBuf,
    output: Utf8PathBuf,
    options: IndexMap<String, CheckToolOptions>,
}

fn group_options(options: Vec<ToolOption>) -> IndexMap<String, CheckToolOptions> {
    let mut grouped: IndexMap<String, CheckToolOptions> = IndexMap::new();
    for option in options {
        grouped
            .entry(option.class_id)
            .or_default()
            .insert(option.name, option.value);
    }
    grouped
}

fn report_event(event: &ExecutorEvent) {
    match event {
        ExecutorEvent::CheckToolStarted {
            check_tool_id,
            index,
            total,
        } => println!("[{}/{}] {}", index + 1, total, check_tool_id),
        ExecutorEvent::StatusChanged { status } => println!("Status: {}", status),
        ExecutorEvent::Progress {
            check_tool_id,
            fraction,
        } => tracing::debug!("Progress {:?}: {:.0}%", check_tool_id, fraction * 100.0),
        ExecutorEvent::DocumentChanged { .. } | ExecutorEvent::Complete => {}
    }
}

fn finish(status: ExecutorStatus) -> Result<()> {
    match status {
        ExecutorStatus::Complete => Ok(()),
        ExecutorStatus::Stopped => bail!("Check suite was stopped"),
        other => bail!("Check suite ended with status {}", other),
    }
}

fn run_in_process(config: &ConfigModel, registry: &PluginRegistry, run: RunArgs) -> Result<()> {
    let plugins = profile_plugins(config, registry, &run.profile)?;
    let mut document = QaDocument::load(&run.document)?;

    let mut executor = CheckExecutor::new(plugins.plugins().to_vec()).with_options(run.options);
    let status = executor.run(&mut document, &mut |event: ExecutorEvent| report_event(&event));

    document.save(&run.output)?;
    println!("Saved {}", run.output);
    finish(status)
}

fn run_isolated(
    config: &ConfigModel,
    registry: &PluginRegistry,
    settings: &QaxSettings,
    run: RunArgs,
    timeout: Option<Duration>,
) -> Result<()> {
    let plugins = profile_plugins(config, registry, &run.profile)?;
    let document = QaDocument::load(&run.document)?;
    let config_dir = config
        .config_dir()
        .canonicalize_utf8()
        .unwrap_or_else(|_| config.config_dir().to_path_buf());

    let request = WorkerRequest {
        config_dir,
        profile_name: run.profile.clone(),
        plugin_class_ids: plugins.plugins().iter().map(|p| p.class_id().to_string()).collect(),
        options: run.options,
        document,
    };
    let executor = match &settings.worker_exe {
        Some(exe) => IsolatedCheckExecutor::new(exe.clone(), request),
        None => IsolatedCheckExecutor::from_current_exe(request)?,
    }
    .with_timeout(timeout);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("qax-runtime")
        .build()?;

    let outcome = runtime.block_on(async move {
        let started = executor.start();
        let stop = started.stop.clone();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping check suite");
                stop.stop();
            }
        });
        let outcome = started.drain(|event| report_event(&event)).await;
        ctrl_c.abort();
        outcome
    })?;

    match outcome.document {
        Some(document) => {
            document.save(&run.output)?;
            println!("Saved {}", run.output);
        }
        None => tracing::warn!("Worker returned no document, {} left unchanged", run.output),
    }
    finish(outcome.status)
}

fn print_summary(
    config: &ConfigModel,
    registry: &PluginRegistry,
    profile_name: &str,
    document: &Utf8Path,
    json: bool,
) -> Result<()> {
    let plugins = profile_plugins(config, registry, profile_name)?;
    let document = QaDocument::load(document)?;
    let table = SummaryTable::build(plugins.plugins(), &document);

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        print!("{}", table);
    }
    Ok(())
}
