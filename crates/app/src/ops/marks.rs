use clap::Args;

use common::crypto::{DiscoveryKey, PublicKey};
use common::projection::{author_marks, load_current_marks};

use crate::ops::{live_project, open, Authors, CommandError};

/// Print where every mark currently points
#[derive(Args, Debug, Clone)]
pub struct Marks {
    pub project: DiscoveryKey,

    /// Only marks written by this log
    #[arg(long)]
    pub author: Option<PublicKey>,
}

#[async_trait::async_trait]
impl crate::op::Op for Marks {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        live_project(&db, &self.project).await?;
        let marks = match &self.author {
            Some(author) => author_marks(&db, &self.project, author).await?,
            None => load_current_marks(&db, &self.project).await?,
        };

        if ctx.json {
            return Ok(serde_json::to_string_pretty(&marks)?);
        }
        if marks.is_empty() {
            return Ok("no marks".to_string());
        }

        let authors = Authors::load(&db, &self.project).await?;
        Ok(marks
            .iter()
            .map(|mark| {
                format!(
                    "{} {:?} -> {}  by {} at {}",
                    mark.identifier,
                    mark.name,
                    mark.draft.short(),
                    authors.label(&mark.author),
                    mark.timestamp
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
