use super::Context;

pub fn run(ctx: &Context, name: Option<&str>) -> anyhow::Result<()> {
    let procfile = ctx.load()?;
    let env = match name {
        Some(name) => procfile.environ(name)?,
        None => procfile.base_environ(),
    };
    for pair in env.to_pairs() {
        println!("{pair}");
    }
    Ok(())
}
