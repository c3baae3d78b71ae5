mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, RunArgs};
use dotenv::dotenv;
use progress::CliReporter;
use refile_core::{
    load_configuration, Engine, LocalTransport, RelocationStatus, RunReport, SshDestination, SshTransport,
    Transport,
};
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Cli::parse();

    match args.command {
        Some(Commands::Run(run)) => {
            // Returns before exiting so the log writer guard is dropped and flushed.
            let success = run_relocation(&run);
            process::exit(if success { 0 } else { 1 });
        }
        Some(Commands::PrintConfig { config }) => {
            let config = load_configuration(config.as_deref()).context("Error loading configuration")?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        None => {
            write_long_help(&mut io::stdout())?;
        }
    }

    Ok(())
}

fn write_long_help(out: &mut impl Write) -> io::Result<()> {
    write!(out, "{}", Cli::command().render_long_help())?;
    out.flush()
}

fn run_relocation(args: &RunArgs) -> bool {
    let mut config = match load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} Error loading configuration: {}", "error:".red().bold(), err);
            return false;
        }
    };
    args.apply(&mut config);

    let _guard = logging::init_logger(config.verbosity);

    let result = build_transport(args)
        .and_then(|transport| {
            if args.is_local_host() {
                config.remote_root = Some(absolute_remote_dir(&args.remote_dir)?);
            }
            Ok(Engine::new(config, transport)?)
        })
        .and_then(|engine| Ok(engine.run(&CliReporter::new())?));

    match result {
        Ok(report) => {
            print_summary(&report);
            report.success()
        }
        Err(err) => {
            error!("Error: {:#}", err);
            eprintln!("{}", "An error occurred. No files have been modified.".red());
            false
        }
    }
}

fn build_transport(args: &RunArgs) -> anyhow::Result<Arc<dyn Transport>> {
    if args.is_local_host() {
        return Ok(Arc::new(LocalTransport::new()));
    }

    let mut destination: SshDestination = args.host.parse().map_err(|e: String| anyhow!(e))?;
    if let Some(username) = &args.username {
        destination.user = Some(username.clone());
    }
    if let Some(port) = args.port {
        destination.port = Some(port);
    }
    info!("Connecting to {}", destination);

    let mut transport = SshTransport::new(destination)
        .with_strict_host_keys(args.req_existing_hostkey)
        .with_local_keys(!args.no_local_keys);
    if let Some(keyfile) = &args.keyfile {
        transport = transport.with_identity_file(keyfile);
    }
    Ok(Arc::new(transport))
}

/// Remote paths on this machine go through the same canonical form as the
/// local walk, so prefixes line up.
fn absolute_remote_dir(remote_dir: &str) -> anyhow::Result<String> {
    let path = Path::new(remote_dir)
        .canonicalize()
        .with_context(|| format!("Remote directory {} is not accessible", remote_dir))?;
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Remote directory {} is not valid UTF-8", path.display()))
}

fn print_summary(report: &RunReport) {
    println!();
    info!(
        "Index: {}, List: {}, Match: {}, Relocate: {}",
        format!("{:.2}s", report.index_duration.as_secs_f64()).green(),
        format!("{:.2}s", report.enumerate_duration.as_secs_f64()).green(),
        format!("{:.2}s", report.match_duration.as_secs_f64()).green(),
        format!("{:.2}s", report.relocate_duration.as_secs_f64()).green(),
    );
    info!(
        "{} local files, {} remote files, {} matched",
        format!("{}", report.scan_stats.total_files).cyan(),
        format!("{}", report.match_stats.remote_files).cyan(),
        format!("{}", report.match_stats.matched).cyan(),
    );

    for issue in &report.scan_issues {
        warn!("Not indexed: {}", issue);
    }
    if !report.warnings.is_empty() {
        info!("{} remote files were not matched", format!("{}", report.warnings.len()).yellow());
    }

    match &report.relocation {
        None => {
            println!("{}", "Dry run, nothing was moved. Planned relocations:".yellow());
            for (target, entry) in &report.plan {
                println!("  {} -> {}", entry.source.display(), target.display());
            }
        }
        Some(relocation) => {
            for outcome in &relocation.outcomes {
                if let RelocationStatus::Failed(message) = &outcome.status {
                    error!("{} -> {}: {}", outcome.source.display(), outcome.target.display(), message);
                }
            }
            if relocation.skipped() > 0 {
                warn!("{} files were not attempted after an earlier failure", relocation.skipped());
            }
            if report.success() {
                println!("{} ({} files relocated)", "Done".green().bold(), relocation.succeeded());
            } else {
                println!(
                    "{} {} of {} relocations failed",
                    "Finished with errors:".red().bold(),
                    relocation.failed(),
                    relocation.outcomes.len()
                );
            }
        }
    }
    info!("Run started at {}", report.started_at.format("%Y-%m-%d %H:%M:%S"));
}
