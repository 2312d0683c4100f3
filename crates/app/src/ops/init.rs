use clap::Args;

use crate::state::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// TCP port the daemon listens on for peers
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Simultaneous peers per project
    #[arg(long)]
    pub max_peers: Option<usize>,

    /// Peer address (`host:port`) to dial; repeatable
    #[arg(long = "connect")]
    pub connect: Vec<String>,
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let defaults = AppConfig::default();
        let config = AppConfig {
            listen_port: self.listen_port.unwrap_or(defaults.listen_port),
            max_peers: self.max_peers.unwrap_or(defaults.max_peers),
            connect: self.connect.clone(),
            ..defaults
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        // apply the schema now so later commands start fast
        state.database().await?;
        let node = state.load_key()?.public();

        Ok(format!(
            "initialized {}\nnode id: {}",
            state.app_dir.display(),
            node
        ))
    }
}
