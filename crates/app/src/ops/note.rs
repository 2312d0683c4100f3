use clap::{Args, Subcommand};

use common::crypto::{Digest, DiscoveryKey};
use common::entry::{Entry, EntryKind, TextRange};

use crate::op::Op;
use crate::ops::{live_project, open, require, write, CommandError};

crate::command_enum! {
    (Add, Add),
}

#[derive(Args, Debug, Clone)]
pub struct Note {
    #[command(subcommand)]
    pub command: Command,
}

#[async_trait::async_trait]
impl Op for Note {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

/// Comment on a draft, or reply to another note
#[derive(Args, Debug, Clone)]
pub struct Add {
    pub project: DiscoveryKey,

    #[arg(long)]
    pub draft: Digest,

    /// Note this one replies to
    #[arg(long)]
    pub parent: Option<Digest>,

    #[arg(long)]
    pub text: String,

    /// Start of the anchored character range (inclusive)
    #[arg(long, requires = "end")]
    pub start: Option<u64>,

    /// End of the anchored character range (exclusive)
    #[arg(long, requires = "start")]
    pub end: Option<u64>,
}

#[async_trait::async_trait]
impl Op for Add {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        live_project(&db, &self.project).await?;
        require(&db, &self.project, EntryKind::Draft, &self.draft).await?;
        // replies to notes we have not received yet are allowed, they stay
        // hidden until the parent arrives
        let range = match (self.start, self.end) {
            (Some(start), Some(end)) => Some(TextRange { start, end }),
            _ => None,
        };

        let entry = Entry::note(self.project, self.draft, self.parent, range, &self.text);
        entry
            .validate()
            .map_err(|e| CommandError::Invalid(e.to_string()))?;
        let digest = write(&db, &self.project, entry).await?;
        Ok(digest.to_string())
    }
}
