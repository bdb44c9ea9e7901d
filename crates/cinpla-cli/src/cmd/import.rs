use crate::cmd::load_config;
use crate::output::{print_json, print_warnings};
use anyhow::Context;
use cinpla_core::{process, stimulus, toolkit::ExternalToolkit, trackball};
use std::path::Path;

pub fn psychopy(root: &Path, action_id: &str, json: bool) -> anyhow::Result<()> {
    let cfg = load_config(root)?;
    let container = process::action_container(root, &cfg, action_id)?;
    let toolkit = ExternalToolkit::from_config(&cfg.toolkit);
    let report = stimulus::import_psychopy(&container, &toolkit)
        .with_context(|| format!("failed to import visual stimuli for '{action_id}'"))?;

    if json {
        return print_json(&report);
    }
    print_warnings(&report.warnings);
    println!("Imported visual stimuli into {action_id}");
    for (kind, count) in &report.stimuli {
        println!("  {kind}: {count}");
    }
    Ok(())
}

pub fn mousexy(root: &Path, action_id: &str, time_offset: f64, json: bool) -> anyhow::Result<()> {
    let cfg = load_config(root)?;
    let container = process::action_container(root, &cfg, action_id)?;
    let toolkit = ExternalToolkit::from_config(&cfg.toolkit);
    let report = trackball::import_mousexy(&container, &toolkit, time_offset)
        .with_context(|| format!("failed to import trackball data for '{action_id}'"))?;

    if json {
        return print_json(&report);
    }
    print_warnings(&report.warnings);
    println!(
        "Imported trackball data into {action_id} (time shift {} s)",
        report.time_shift
    );
    for (name, samples) in &report.series {
        println!("  {name}: {samples} samples");
    }
    Ok(())
}
