use super::Context;
use anyhow::Context as _;
use mill_core::Procfile;

pub fn run(ctx: &Context) -> anyhow::Result<()> {
    let created = Procfile::create(&ctx.root, &ctx.file)
        .with_context(|| format!("failed to write {}", ctx.file))?;
    if created {
        println!("created: {}", ctx.root.join(&ctx.file).display());
    } else {
        println!("exists:  {}", ctx.root.join(&ctx.file).display());
    }
    Ok(())
}
