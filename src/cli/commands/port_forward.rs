use crate::config::Context;
use crate::error::Result;
use crate::forward;

pub async fn execute(ctx: &Context, specs: Vec<String>) -> Result<()> {
    forward::run_port_forward(ctx, &specs).await
}
