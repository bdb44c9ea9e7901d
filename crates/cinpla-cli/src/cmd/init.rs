use anyhow::Context;
use cinpla_core::{config::Config, io, paths};
use std::path::Path;

use crate::output::print_json;

pub fn run(root: &Path, project_id: Option<&str>, json: bool) -> anyhow::Result<()> {
    let project_id = match project_id {
        Some(id) => id.to_string(),
        None => root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string()),
    };

    for dir in [paths::EXPIPE_DIR, paths::ACTIONS_DIR, paths::SUBJECTS_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    let created = !config_path.exists();
    if created {
        Config::new(&project_id)
            .save(root)
            .context("failed to write config.yaml")?;
    }

    if json {
        print_json(&serde_json::json!({
            "root": root,
            "project": project_id,
            "config_created": created,
        }))?;
    } else {
        println!("Initializing project in: {}", root.display());
        let state = if created { "created" } else { "exists" };
        println!("  {state}: {}", paths::CONFIG_FILE);
    }
    Ok(())
}
