use clap::{Args, Subcommand};

pub mod create;
pub mod delete;
pub mod invite;
pub mod join;
pub mod list;

use crate::op::Op;

crate::command_enum! {
    (Create, create::Create),
    (List, list::List),
    (Delete, delete::Delete),
    (Invite, invite::Invite),
    (Join, join::Join),
}

pub type ProjectCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Project {
    #[command(subcommand)]
    pub command: ProjectCommand,
}

#[async_trait::async_trait]
impl Op for Project {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
