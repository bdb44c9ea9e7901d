use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use cinpla_core::action::{ActionStore, DATETIME_FORMAT};
use std::path::Path;

#[derive(Subcommand)]
pub enum ActionSubcommand {
    /// List actions in the project
    List {
        /// Only actions of this type
        #[arg(long = "type")]
        action_type: Option<String>,
    },

    /// Show one action's attributes
    Show { action_id: String },
}

pub fn run(root: &Path, subcmd: ActionSubcommand, json: bool) -> anyhow::Result<()> {
    let store = ActionStore::project(root);
    match subcmd {
        ActionSubcommand::List { action_type } => list(&store, action_type.as_deref(), json),
        ActionSubcommand::Show { action_id } => {
            let action = store.load(&action_id)?;
            if json {
                print_json(&action)
            } else {
                let yaml = serde_yaml::to_string(&action).context("failed to render action")?;
                print!("{yaml}");
                Ok(())
            }
        }
    }
}

fn list(store: &ActionStore, action_type: Option<&str>, json: bool) -> anyhow::Result<()> {
    let mut actions = store.list().context("failed to list actions")?;
    if let Some(wanted) = action_type {
        actions.retain(|a| a.action_type.is_some_and(|t| t.as_str().eq_ignore_ascii_case(wanted)));
    }

    if json {
        return print_json(&actions);
    }
    if actions.is_empty() {
        println!("No actions.");
        return Ok(());
    }
    let rows = actions
        .iter()
        .map(|a| {
            vec![
                a.id.clone(),
                a.action_type.map(|t| t.as_str()).unwrap_or("-").to_string(),
                a.datetime
                    .map(|d| d.format(DATETIME_FORMAT).to_string())
                    .unwrap_or_else(|| "-".to_string()),
                a.entities.join(","),
                a.tags.join(","),
            ]
        })
        .collect();
    print_table(&["ID", "TYPE", "DATETIME", "ENTITIES", "TAGS"], rows);
    Ok(())
}
