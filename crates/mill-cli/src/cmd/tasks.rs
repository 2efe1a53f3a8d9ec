use super::Context;
use crate::output::{print_json, print_table};

pub fn run(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let procfile = ctx.load()?;
    let tasks: Vec<_> = procfile.tasks().filter(|t| !t.hidden()).collect();

    if json {
        let items: Vec<serde_json::Value> = tasks
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "usage": t.usage(),
                    "description": t.description(),
                    "service": t.parent(),
                })
            })
            .collect();
        return print_json(&items);
    }

    if tasks.is_empty() {
        println!("No tasks defined.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = tasks
        .iter()
        .map(|t| {
            vec![
                t.usage().unwrap_or(t.name()).to_string(),
                t.description().unwrap_or("").to_string(),
            ]
        })
        .collect();
    print_table(&["TASK", "DESCRIPTION"], &rows);
    Ok(())
}
