use clap::{Args, Parser, Subcommand};
use clarion_core::{ConformanceLevel, JobId, WcagVersion};
use clarion_scheduler::Frequency;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "clarion",
    version,
    about = "Crawl sites and audit every page for accessibility"
)]
pub struct Cli {
    /// Config file to read instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the queue, stuck-job recovery and the scheduler until interrupted
    Serve,

    /// Crawl one site now and print its results
    Crawl(CrawlArgs),

    /// Print a stored job and its violations
    Status {
        job_id: JobId,
    },
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// Root URL; https is assumed when no scheme is given
    pub url: String,

    /// Link depth below the root (1-5)
    #[arg(long)]
    pub depth: Option<u32>,

    /// Maximum pages to scan (1-1000)
    #[arg(long)]
    pub pages: Option<u32>,

    /// Pages per minute (1-60)
    #[arg(long)]
    pub rate: Option<u32>,

    #[arg(long, default_value = "2.1")]
    pub wcag: WcagVersion,

    #[arg(long, default_value = "AA")]
    pub level: ConformanceLevel,

    /// Also repeat this crawl daily, weekly or monthly
    #[arg(long)]
    pub every: Option<Frequency>,
}
