use clap::Args;

use common::crypto::DiscoveryKey;
use common::entry::Entry;

use crate::ops::{live_project, open, write, CommandError};

/// Tell collaborators who is writing from this device
#[derive(Args, Debug, Clone)]
pub struct Intro {
    pub project: DiscoveryKey,

    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub device: String,
}

#[async_trait::async_trait]
impl crate::op::Op for Intro {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        live_project(&db, &self.project).await?;

        let entry = Entry::intro(self.project, &self.name, &self.device);
        entry
            .validate()
            .map_err(|e| CommandError::Invalid(e.to_string()))?;
        write(&db, &self.project, entry).await?;
        Ok(format!("introduced as {} on {}", self.name, self.device))
    }
}
