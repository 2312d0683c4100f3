// CLI modules
mod args;
mod op;
mod ops;
mod state;
mod version;

// Storage and the long-running replication service
mod daemon;
mod database;

use args::Args;
use clap::{Parser, Subcommand};
use op::Op;
use ops::{Daemon, Draft, Graph, Init, Intro, Mark, Marks, Note, Notes, Project, Version};

command_enum! {
    (Init, Init),
    (Project, Project),
    (Draft, Draft),
    (Mark, Mark),
    (Note, Note),
    (Intro, Intro),
    (Graph, Graph),
    (Marks, Marks),
    (Notes, Notes),
    (Daemon, Daemon),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let ctx = op::OpContext::new(args.config_path, args.json);

    // the daemon installs its own subscriber with file output
    if !matches!(args.command, Command::Daemon(_)) {
        daemon::utils::init_cli_logging();
    }

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
