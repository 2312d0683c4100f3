use clap::Args;

use common::crypto::DiscoveryKey;

use crate::ops::{live_project, open, CommandError};

#[derive(Args, Debug, Clone)]
pub struct Invite {
    pub project: DiscoveryKey,
}

#[async_trait::async_trait]
impl crate::op::Op for Invite {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        let project = live_project(&db, &self.project).await?;
        Ok(project.invitation().to_string())
    }
}
