use super::{block_on, Context};
use crate::output::{print_json, print_table};
use anyhow::Context as _;

pub fn run(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let procfile = ctx.load()?;
    let mut resolver = ctx.resolver(&procfile);
    if !ctx.no_nix {
        mill_nix::ensure_available()?;
        block_on(resolver.query_all())?.context("failed to query packages")?;
    }

    let deps = resolver.dependencies();
    if json {
        return print_json(deps);
    }
    if deps.is_empty() {
        println!("No packages required.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = deps
        .iter()
        .map(|d| {
            vec![
                d.name.clone(),
                d.state.to_string(),
                d.attr.clone().unwrap_or_else(|| "-".into()),
                d.package
                    .as_ref()
                    .map(|p| p.version.clone())
                    .unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["PACKAGE", "STATE", "PINNED", "VERSION"], &rows);
    Ok(())
}
