use std::path::PathBuf;

use clap::Args;

use crate::daemon::{run, DaemonConfig, DaemonError};
use crate::state::AppState;

/// Replicate every local project with peers until interrupted
#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Override the listen port from config.toml
    #[arg(long)]
    pub port: Option<u16>,

    /// Extra peer (`host:port`) to dial, on top of config.toml
    #[arg(long = "connect")]
    pub connect: Vec<String>,

    /// Also write logs to daily files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[async_trait::async_trait]
impl crate::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;

        let mut connect = state.config.connect.clone();
        for addr in &self.connect {
            if !connect.contains(addr) {
                connect.push(addr.clone());
            }
        }
        let config = DaemonConfig {
            listen_port: self.port.unwrap_or(state.config.listen_port),
            max_peers: state.config.max_peers,
            connect,
            log_level: state.config.log_level.clone(),
            log_dir: self.log_dir.clone(),
        };

        run(state, config).await?;
        Ok("daemon stopped".to_string())
    }
}
