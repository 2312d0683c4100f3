use clap::Args;

use common::project::{default_identity_or_create, Invitation, Project, ProjectRegistry};

use crate::ops::{open, CommandError};

#[derive(Args, Debug, Clone)]
pub struct Join {
    /// Invitation printed by `project create` or `project invite`
    pub invitation: Invitation,

    /// Local title for the project
    #[arg(long, default_value = "untitled")]
    pub title: String,
}

#[async_trait::async_trait]
impl crate::op::Op for Join {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        let project = Project::join(&self.invitation, &self.title);
        let discovery_key = project.discovery_key;

        db.put_project(project).await?;
        let identity = default_identity_or_create(&db, &discovery_key).await?;

        Ok(format!(
            "joined project {}\nwriting as {}\nrun `draftsync daemon` to fetch its history",
            discovery_key,
            identity.key.public()
        ))
    }
}
