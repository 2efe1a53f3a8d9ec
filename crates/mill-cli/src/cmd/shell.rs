use super::{block_on, Context};

pub fn run(ctx: &Context, service: Option<&str>) -> anyhow::Result<()> {
    block_on(async {
        let runner = ctx.runner().await?;
        runner.run_shell(service).await?;
        Ok::<_, anyhow::Error>(())
    })?
}
