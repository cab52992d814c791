use clap::Parser;
use colored::Colorize;
use dialoguer::MultiSelect;
use outreap::{
    DEFAULT_EXCLUDED, ReapPolicy, ReapReport, Reaper, ScanOutcome, default_root, format_size,
    parse_threshold,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EXIT_FATAL: u8 = 1;
/// Distinct from clap's usage-error code (2).
const EXIT_PARTIAL: u8 = 3;

#[derive(Parser)]
#[command(name = "outreap")]
#[command(about = "Delete stale upload directories from an output staging area")]
#[command(version)]
struct Cli {
    /// Staging directory to clean (defaults to `output/` next to this executable)
    path: Option<PathBuf>,

    /// Delete directories older than this (e.g. 90s, 15m, 2h, 1d; bare numbers are minutes)
    #[arg(short, long, default_value = "15m", value_parser = parse_threshold_arg)]
    threshold: Duration,

    /// Never delete a directory with this name (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "NAME")]
    exclude: Vec<String>,

    /// Do not apply the built-in exclusions (.gitignore, .gitkeep)
    #[arg(long)]
    no_default_excludes: bool,

    /// Show what would be deleted without deleting
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Choose which stale directories to delete
    #[arg(short, long, conflicts_with = "dry_run")]
    interactive: bool,

    /// More log output (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn parse_threshold_arg(s: &str) -> Result<Duration, String> {
    parse_threshold(s).map_err(|e| e.to_string())
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_policy(cli: &Cli) -> ReapPolicy {
    let base: Vec<String> = if cli.no_default_excludes {
        Vec::new()
    } else {
        DEFAULT_EXCLUDED.iter().map(|s| s.to_string()).collect()
    };
    ReapPolicy::new(cli.threshold, base.into_iter().chain(cli.exclude.iter().cloned()))
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    if secs >= 86_400 {
        format!("{}d", secs / 86_400)
    } else if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// `Ok(None)` when the user backs out with Esc or `q`.
fn select_interactively(plan: &ScanOutcome) -> Result<Option<HashSet<String>>, dialoguer::Error> {
    let max_name_len = plan.stale.iter().map(|d| d.name.len()).max().unwrap_or(20);
    let items: Vec<String> = plan
        .stale
        .iter()
        .map(|d| {
            format!(
                "{:<width$}  {:>10}  {:>5} old",
                d.name,
                d.size_human(),
                format_age(d.age),
                width = max_name_len
            )
        })
        .collect();
    let defaults = vec![true; items.len()];

    println!("Use {} to toggle, {} to confirm:\n", "Space".cyan(), "Enter".cyan());

    let indices = MultiSelect::new()
        .items(&items)
        .defaults(&defaults)
        .interact_opt()?;

    Ok(indices.map(|indices| indices.into_iter().map(|i| plan.stale[i].name.clone()).collect()))
}

fn print_report(root: &Path, report: &ReapReport) {
    for name in &report.deleted {
        let verb = if report.dry_run { "Would delete" } else { "Deleted" };
        println!("  {} {}", verb.red(), root.join(name).display());
    }

    if !report.failed.is_empty() {
        println!("\n{}", "Failed to delete:".red());
        for err in &report.failed {
            println!("  {}", err);
        }
    }

    if report.deleted.is_empty() {
        println!("{}", "No stale directories found.".yellow());
    } else if report.dry_run {
        println!(
            "\n{} {} in {} directories",
            "Dry run - would reclaim".yellow(),
            format_size(report.reclaimed_bytes).green().bold(),
            report.deleted.len().to_string().green()
        );
    } else {
        println!(
            "\n{} Cleaned {} in {} directories",
            "Done!".green().bold(),
            format_size(report.reclaimed_bytes).green().bold(),
            report.deleted.len().to_string().green()
        );
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let root = match cli.path.clone() {
        Some(path) => Ok(path),
        None => default_root(),
    };
    let root = match root {
        Ok(root) => root,
        Err(e) => {
            eprintln!("{} cannot locate default root: {}", "error:".red().bold(), e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let reaper = Reaper::new(build_policy(&cli)).dry_run(cli.dry_run);

    println!(
        "{} {} (older than {})...\n",
        "Scanning".cyan().bold(),
        root.display(),
        format_age(reaper.policy().threshold)
    );

    let result = if cli.interactive {
        match reaper.plan(&root) {
            Ok(plan) if plan.stale.is_empty() => Ok(reaper.execute(&root, plan, &HashSet::new())),
            Ok(plan) => match select_interactively(&plan) {
                Ok(Some(selected)) => Ok(reaper.execute(&root, plan, &selected)),
                Ok(None) => {
                    println!("\n{}", "Cancelled.".yellow());
                    return ExitCode::SUCCESS;
                }
                Err(e) => {
                    eprintln!("{} selection failed: {}", "error:".red().bold(), e);
                    return ExitCode::from(EXIT_FATAL);
                }
            },
            Err(e) => Err(e),
        }
    } else {
        reaper.run(&root)
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    print_report(&root, &report);

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL)
    }
}
