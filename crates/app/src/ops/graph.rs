use clap::Args;

use common::crypto::DiscoveryKey;
use common::projection::load_draft_graph;

use crate::ops::{live_project, open, Authors, CommandError};

/// Print the draft graph, oldest first
#[derive(Args, Debug, Clone)]
pub struct Graph {
    pub project: DiscoveryKey,
}

#[async_trait::async_trait]
impl crate::op::Op for Graph {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        live_project(&db, &self.project).await?;
        let graph = load_draft_graph(&db, &self.project).await?;

        if ctx.json {
            return Ok(serde_json::to_string_pretty(&graph)?);
        }
        if graph.is_empty() {
            return Ok("no drafts".to_string());
        }

        let authors = Authors::load(&db, &self.project).await?;
        let lines: Vec<String> = graph
            .iter()
            .map(|brief| {
                let parents = brief
                    .parents
                    .iter()
                    .map(|parent| parent.short())
                    .collect::<Vec<_>>()
                    .join(",");
                format!(
                    "{} {} <- [{}] {}{}",
                    brief.timestamp,
                    brief.digest.short(),
                    parents,
                    authors.label(&brief.author),
                    if brief.is_merge() { " (merge)" } else { "" }
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}
