use clap::{Args, Subcommand};

use common::crypto::{Digest, DiscoveryKey};
use common::entry::{Entry, EntryKind, MarkId};

use crate::op::Op;
use crate::ops::{live_project, open, require, write, CommandError};

crate::command_enum! {
    (Set, Set),
}

#[derive(Args, Debug, Clone)]
pub struct Mark {
    #[command(subcommand)]
    pub command: Command,
}

#[async_trait::async_trait]
impl Op for Mark {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

/// Point a named mark at a draft, creating it or moving an existing one
#[derive(Args, Debug, Clone)]
pub struct Set {
    pub project: DiscoveryKey,

    #[arg(long)]
    pub draft: Digest,

    #[arg(long)]
    pub name: String,

    /// Identifier of the mark to move; omit to create a new mark
    #[arg(long)]
    pub identifier: Option<MarkId>,
}

#[async_trait::async_trait]
impl Op for Set {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        live_project(&db, &self.project).await?;
        require(&db, &self.project, EntryKind::Draft, &self.draft).await?;

        let identifier = self.identifier.unwrap_or_else(MarkId::generate);
        let entry = Entry::mark(self.project, Some(identifier), &self.name, self.draft);
        entry
            .validate()
            .map_err(|e| CommandError::Invalid(e.to_string()))?;
        let digest = write(&db, &self.project, entry).await?;
        Ok(format!("mark {} -> {} ({})", identifier, self.draft.short(), digest))
    }
}
