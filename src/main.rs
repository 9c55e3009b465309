//! CLI entry point for `popattach`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use popattach::config::{self, Config};
use popattach::report::TracingReporter;
use popattach::workflow::{self, RunSummary};

#[derive(Parser)]
#[command(
    name = "popattach",
    version,
    about = "Download attachments from a POP3 mailbox into a local folder"
)]
struct Cli {
    /// Mailbox user name
    #[arg(value_name = "USER")]
    user: String,

    /// Mailbox password
    #[arg(value_name = "PASSWORD", env = "POPATTACH_PASSWORD", hide_env_values = true)]
    password: String,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", env = "POPATTACH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    // Missing arguments make clap print usage and exit with status 2.
    let cli = Cli::parse();

    let config_path = config::config_file_path(cli.config.as_deref())
        .context("Could not determine config file path")?;
    let config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;

    popattach::logging::init(&config.logging, cli.verbose)?;
    tracing::debug!(path = %config_path.display(), "Using config");

    let summary = cmd_download(&config, &cli.user, &cli.password)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, &config.application.save_folder);
    }

    Ok(())
}

/// Run the download with a progress bar on stderr.
fn cmd_download(config: &Config, user: &str, password: &str) -> anyhow::Result<RunSummary> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Downloading [{bar:40.cyan/blue}] {pos}/{len} messages")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let result = workflow::download_attachments(
        &config.application,
        user,
        password,
        &TracingReporter,
        &|current, total| {
            pb.set_length(total as u64);
            pb.set_position(current as u64);
        },
    );
    pb.finish_and_clear();

    result.with_context(|| format!("Download from {} failed", config.application.mailserver))
}

fn print_summary(summary: &RunSummary, save_folder: &Path) {
    println!();
    if summary.messages == 0 {
        println!("  There are no new messages.");
        println!();
        return;
    }

    println!("  {:<25} {}", "Messages", summary.messages);
    println!("  {:<25} {}", "Processed", summary.processed);
    if summary.failed > 0 {
        println!("  {:<25} {}", "Failed", summary.failed);
    }
    println!("  {:<25} {}", "Attachments saved", summary.attachments_saved);
    if summary.attachments_failed > 0 {
        println!("  {:<25} {}", "Attachments failed", summary.attachments_failed);
    }
    if summary.deleted > 0 {
        println!("  {:<25} {}", "Deleted from server", summary.deleted);
    }
    println!("  {:<25} {}", "Save folder", save_folder.display());
    println!();
}
