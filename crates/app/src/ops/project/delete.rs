use clap::Args;

use common::crypto::DiscoveryKey;
use common::project::ProjectRegistry;

use crate::ops::{live_project, open, CommandError};

#[derive(Args, Debug, Clone)]
pub struct Delete {
    pub project: DiscoveryKey,
}

#[async_trait::async_trait]
impl crate::op::Op for Delete {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        live_project(&db, &self.project).await?;
        db.delete_project(&self.project).await?;
        Ok(format!("deleted project {}", self.project))
    }
}
