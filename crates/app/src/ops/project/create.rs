use clap::Args;

use common::project::{default_identity_or_create, Project, ProjectRegistry};

use crate::ops::{open, CommandError};

#[derive(Args, Debug, Clone)]
pub struct Create {
    /// Title shown for the project on this device
    pub title: String,
}

#[async_trait::async_trait]
impl crate::op::Op for Create {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let db = open(ctx).await?;
        let project = Project::create(&self.title);
        let discovery_key = project.discovery_key;
        let invitation = project.invitation();

        db.put_project(project).await?;
        let identity = default_identity_or_create(&db, &discovery_key).await?;

        Ok(format!(
            "created project {}\nwriting as {}\ninvitation: {}",
            discovery_key,
            identity.key.public(),
            invitation
        ))
    }
}
