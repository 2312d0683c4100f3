pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "draftsync")]
#[command(about = "Write together over signed, replicated logs")]
#[command(version = env!("REPO_VERSION"))]
pub struct Args {
    /// Path to the draftsync state directory (defaults to ~/.draftsync)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Print results as JSON where supported
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: crate::Command,
}
