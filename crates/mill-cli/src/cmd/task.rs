use super::{block_on, Context};
use anyhow::anyhow;

/// `mill <task> [args..]`
pub fn run(ctx: &Context, args: &[String]) -> anyhow::Result<()> {
    let (word, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("no task given"))?;
    let procfile = ctx.load()?;
    let task = procfile
        .task_for_invocation(word)
        .ok_or_else(|| anyhow!("unknown command or task '{word}'\nRun: mill tasks"))?
        .name()
        .to_string();

    block_on(async {
        let runner = ctx.runner().await?;
        runner.run_task(&task, rest.to_vec()).await?;
        Ok::<_, anyhow::Error>(())
    })?
}
