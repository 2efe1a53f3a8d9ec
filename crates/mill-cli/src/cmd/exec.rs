use super::{block_on, Context};

pub fn run(ctx: &Context, service: Option<&str>, command: &[String]) -> anyhow::Result<()> {
    let line = command.join(" ");
    block_on(async {
        let runner = ctx.runner().await?;
        runner.run_command(service, &line).await?;
        Ok::<_, anyhow::Error>(())
    })?
}
