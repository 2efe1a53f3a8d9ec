use super::{block_on, Context};

pub fn run(ctx: &Context, only: &[String], except: &[String]) -> anyhow::Result<()> {
    block_on(async {
        let runner = ctx.runner().await?;
        runner.run_services(only, except).await?;
        Ok::<_, anyhow::Error>(())
    })?
}
