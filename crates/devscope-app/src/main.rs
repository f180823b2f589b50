//! devscope - merge-commit review reports for git authors
//!
//! Mines a repository for an author's merge commits, scores them, has a
//! model review the heaviest ones, and renders the results as an HTML
//! report. Also runs as an HTTP service.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devscope_adapters::config::Config;
use devscope_adapters::store;
use devscope_engine::orchestrator::{analyze_author, AnalyzeOptions};
use devscope_engine::{ChatBackend, HttpBackend};
use devscope_server::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "devscope",
    about = "Author-level merge-commit review reports",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        /// Listen address.
        #[arg(long, default_value = "0.0.0.0:8000")]
        addr: SocketAddr,
    },
    /// Analyze one author's merge commits in a local repository.
    Analyze {
        /// Path to a cloned repository.
        repo: PathBuf,
        /// Author username (as derived from commit e-mails).
        #[arg(long)]
        author: String,
        /// Also render the HTML report.
        #[arg(long)]
        report: bool,
        /// Repository URL used for commit links in the report.
        #[arg(long)]
        repo_url: Option<String>,
    },
    /// Render the HTML report from a previously saved analysis.
    Report {
        /// Author username.
        #[arg(long)]
        author: String,
        /// Repository URL used for commit links.
        #[arg(long)]
        repo_url: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_backend(config: &Config) -> Result<Arc<dyn ChatBackend>> {
    let api_key = config
        .api_key()
        .context("No API key configured. Set DEVSCOPE_API_KEY or OPENAI_API_KEY.")?;
    let backend = HttpBackend::new(
        &config.api_base_url,
        api_key,
        Duration::from_secs(config.round_timeout_secs),
    )?;
    Ok(Arc::new(backend))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = Config::load();

    match args.command {
        Command::Serve { addr } => {
            let backend = build_backend(&config)?;
            let state = Arc::new(AppState { config, backend });
            devscope_server::serve(addr, state).await
        }
        Command::Analyze {
            repo,
            author,
            report,
            repo_url,
        } => {
            let backend = build_backend(&config)?;
            let options = AnalyzeOptions::from_config(&config);
            let aggregate = analyze_author(&repo, &author, backend, &options).await?;
            let json_path = store::write_author_aggregate(&config.output_dir, &aggregate)?;
            println!("Analysis saved to {}", json_path.display());

            if report {
                let html_path = devscope_report::write_report(
                    &config.output_dir,
                    &aggregate,
                    repo_url.as_deref(),
                )?;
                println!("Report written to {}", html_path.display());
            }
            Ok(())
        }
        Command::Report { author, repo_url } => {
            let aggregate = store::read_author_aggregate(&config.output_dir, &author)?
                .with_context(|| format!("No analysis found for author '{author}'"))?;
            let html_path =
                devscope_report::write_report(&config.output_dir, &aggregate, repo_url.as_deref())?;
            println!("Report written to {}", html_path.display());
            Ok(())
        }
    }
}
