use crate::cmd::{load_config, now};
use crate::output::print_json;
use crate::prompt::StdinConfirm;
use anyhow::Context;
use clap::Args;
use cinpla_core::{
    action::{parse_datetime, ActionStore},
    adjust::{adjust, AdjustRequest},
    confirm::{Confirm, Preset},
};
use std::path::Path;

#[derive(Args)]
pub struct AdjustArgs {
    pub subject: String,

    /// Date as dd.mm.yyyyTHH:MM, or `now`
    #[arg(short, long, default_value = "now")]
    pub date: String,

    /// Adjustment in um, repeatable
    #[arg(short, long = "adjustment", num_args = 2, value_names = ["KEY", "UM"])]
    pub adjustments: Vec<String>,

    /// Start from the implantation depth
    #[arg(long)]
    pub init: bool,

    /// Adjustment index (default: one after the latest)
    #[arg(long)]
    pub index: Option<u32>,

    #[arg(long)]
    pub overwrite: bool,

    #[arg(short, long)]
    pub user: Option<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

fn parse_adjustments(values: &[String]) -> anyhow::Result<Vec<(String, f64)>> {
    values
        .chunks(2)
        .map(|pair| match pair {
            [key, um] => {
                let um: f64 = um
                    .parse()
                    .with_context(|| format!("adjustment '{um}' for '{key}' is not a number"))?;
                Ok((key.clone(), um))
            }
            _ => anyhow::bail!("adjustment needs a key and a value"),
        })
        .collect()
}

pub fn run(root: &Path, args: AdjustArgs, json: bool) -> anyhow::Result<()> {
    let cfg = load_config(root)?;
    let req = AdjustRequest {
        subject: args.subject.clone(),
        date: parse_datetime(&args.date, now())?,
        adjustments: parse_adjustments(&args.adjustments)?,
        user: cfg.resolve_user(args.user.as_deref())?,
        init: args.init,
        index: args.index,
        overwrite: args.overwrite,
    };

    let mut preset = Preset::yes();
    let mut stdin = StdinConfirm;
    let confirm: &mut dyn Confirm = if args.yes { &mut preset } else { &mut stdin };

    let outcome = adjust(&ActionStore::project(root), &req, confirm)
        .with_context(|| format!("failed to adjust '{}'", args.subject))?;

    if json {
        return print_json(&outcome);
    }
    println!("Registered {} in {}", outcome.module, outcome.action_id);
    for (key, depth) in &outcome.depth {
        println!("  {key}: {depth}");
    }
    Ok(())
}
