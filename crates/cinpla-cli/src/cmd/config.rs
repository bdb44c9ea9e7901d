use crate::cmd::load_config;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use cinpla_core::config::WarnLevel;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config for common mistakes
    Validate,

    /// List configured processing servers
    Servers,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(root, json),
        ConfigSubcommand::Servers => servers(root, json),
    }
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

fn servers(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;

    if json {
        // Passwords stay out of the output.
        let servers: Vec<_> = config
            .servers
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name,
                    "hostname": s.hostname(),
                    "user": s.user,
                    "port": s.port,
                    "scratch_root": s.scratch_root,
                    "program": s.program,
                    "password": s.password.is_some(),
                })
            })
            .collect();
        return print_json(&servers);
    }

    if config.servers.is_empty() {
        println!("No servers configured.");
        return Ok(());
    }
    let rows = config
        .servers
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.destination(),
                s.port.to_string(),
                s.scratch_root.clone(),
            ]
        })
        .collect();
    print_table(&["NAME", "DESTINATION", "PORT", "SCRATCH"], rows);
    Ok(())
}
