use clap::{Args, Subcommand};

use common::crypto::{Digest, DiscoveryKey};
use common::entry::{Entry, EntryKind};

use crate::op::Op;
use crate::ops::{live_project, open, require, write, CommandError};

crate::command_enum! {
    (Add, Add),
}

#[derive(Args, Debug, Clone)]
pub struct Draft {
    #[command(subcommand)]
    pub command: Command,
}

#[async_trait::async_trait]
impl Op for Draft {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

/// Write a new version of the text
#[derive(Args, Debug, Clone)]
pub struct Add {
    pub project: DiscoveryKey,

    #[arg(long)]
    pub text: String,

    /// Draft this one revises; repeat to merge several
    #[arg(long = "parent")]
    pub parents: Vec<Digest>,
}

#[async_trait::async_trait]
impl Op for Add {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        live_project(&db, &self.project).await?;
        for parent in &self.parents {
            require(&db, &self.project, EntryKind::Draft, parent).await?;
        }

        let entry = Entry::draft(self.project, self.parents.clone(), &self.text);
        entry
            .validate()
            .map_err(|e| CommandError::Invalid(e.to_string()))?;
        let digest = write(&db, &self.project, entry).await?;
        Ok(digest.to_string())
    }
}
