use clap::Args;
use serde::Serialize;

use common::crypto::DiscoveryKey;
use common::log_store::LogStore;
use common::project::ProjectRegistry;

use crate::ops::{open, CommandError};

#[derive(Args, Debug, Clone)]
pub struct List {
    /// Include deleted projects
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Serialize)]
struct ProjectSummary {
    discovery_key: DiscoveryKey,
    title: String,
    deleted: bool,
    logs: usize,
    entries: u64,
}

#[async_trait::async_trait]
impl crate::op::Op for List {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;

        let mut summaries = Vec::new();
        for project in db.list_projects().await? {
            if project.deleted && !self.all {
                continue;
            }
            let logs = db.list_logs(&project.discovery_key).await?;
            summaries.push(ProjectSummary {
                discovery_key: project.discovery_key,
                title: project.title,
                deleted: project.deleted,
                logs: logs.len(),
                entries: logs.iter().map(|(_, head)| head + 1).sum(),
            });
        }

        if ctx.json {
            return Ok(serde_json::to_string_pretty(&summaries)?);
        }
        if summaries.is_empty() {
            return Ok("no projects".to_string());
        }
        Ok(summaries
            .iter()
            .map(|s| {
                format!(
                    "{}  {}  {} logs, {} entries{}",
                    s.discovery_key,
                    s.title,
                    s.logs,
                    s.entries,
                    if s.deleted { "  (deleted)" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
