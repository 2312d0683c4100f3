use clap::Args;

use common::crypto::{Digest, DiscoveryKey};
use common::projection::{load_note_forest, NoteNode};

use crate::ops::{live_project, open, Authors, CommandError};

/// Print the note threads on a draft
#[derive(Args, Debug, Clone)]
pub struct Notes {
    pub project: DiscoveryKey,

    #[arg(long)]
    pub draft: Digest,
}

fn render(node: &NoteNode, depth: usize, authors: &Authors, lines: &mut Vec<String>) {
    let range = node
        .range
        .as_ref()
        .map(|range| format!(" [{}..{}]", range.start, range.end))
        .unwrap_or_default();
    lines.push(format!(
        "{}{} {}{}: {}",
        "  ".repeat(depth),
        node.digest.short(),
        authors.label(&node.author),
        range,
        node.text
    ));
    for child in &node.children {
        render(child, depth + 1, authors, lines);
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Notes {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        live_project(&db, &self.project).await?;
        let forest = load_note_forest(&db, &self.project, &self.draft).await?;

        if ctx.json {
            return Ok(serde_json::to_string_pretty(&forest)?);
        }
        if forest.is_empty() {
            return Ok("no notes".to_string());
        }

        let authors = Authors::load(&db, &self.project).await?;
        let mut lines = Vec::new();
        for root in &forest {
            render(root, 0, &authors, &mut lines);
        }
        Ok(lines.join("\n"))
    }
}
