use crate::cmd::{load_config, now};
use crate::output::print_json;
use anyhow::Context;
use cinpla_core::action::{annotate, ActionStore};
use std::path::Path;

pub fn run(
    root: &Path,
    action_id: &str,
    tags: &[String],
    messages: &[String],
    user: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let cfg = load_config(root)?;
    let user = cfg.resolve_user(user)?;
    cfg.check_tags(tags)?;

    let action = annotate(&ActionStore::project(root), action_id, &user, tags, messages, now())
        .with_context(|| format!("failed to annotate '{action_id}'"))?;

    if json {
        print_json(&action)?;
    } else {
        println!(
            "Annotated {}: {} tag(s), {} message(s)",
            action.id,
            action.tags.len(),
            action.messages.len()
        );
    }
    Ok(())
}
