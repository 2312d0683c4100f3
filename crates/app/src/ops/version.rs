use clap::Args;

use crate::version::build_info;

#[derive(Args, Debug, Clone)]
pub struct Version {}

#[async_trait::async_trait]
impl crate::op::Op for Version {
    type Error = std::convert::Infallible;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let build = build_info();
        if ctx.json {
            if let Ok(json) = serde_json::to_string_pretty(&build) {
                return Ok(json);
            }
        }
        Ok(build.to_string())
    }
}
