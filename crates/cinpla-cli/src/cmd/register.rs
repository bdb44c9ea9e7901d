use crate::cmd::{load_config, now};
use crate::output::print_json;
use crate::prompt::StdinConfirm;
use anyhow::Context;
use clap::Args;
use cinpla_core::{
    acquisition::AcquisitionSystem,
    convert::RawCopyConverter,
    depth::{DepthEntry, DepthSource},
    register::{register_recording, RecordingRequest, RegisterDeps},
};
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct RegisterArgs {
    /// Open Ephys recording directory or Axona .set file
    pub raw_path: PathBuf,

    /// Action id (default: <entity>-<ddmmyy>-<session>)
    #[arg(short, long)]
    pub action_id: Option<String>,

    /// Acquisition system: open-ephys or axona (default: detected)
    #[arg(long)]
    pub system: Option<String>,

    /// Subject id (default: taken from the path)
    #[arg(long)]
    pub entity_id: Option<String>,

    /// Session number (default: taken from the path)
    #[arg(long)]
    pub session: Option<String>,

    #[arg(short, long)]
    pub user: Option<String>,

    #[arg(short, long)]
    pub location: Option<String>,

    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    #[arg(short, long = "message")]
    pub messages: Vec<String>,

    /// Electrode depth, repeatable
    #[arg(long, num_args = 4, value_names = ["KEY", "PROBE", "VALUE", "UNIT"])]
    pub depth: Vec<String>,

    /// Store the depth module, found from adjustments unless --depth is given
    #[arg(long)]
    pub register_depth: bool,

    /// Accept the depths without asking
    #[arg(long)]
    pub confirm_depth: bool,

    /// Config template to apply, repeatable
    #[arg(long = "template")]
    pub templates: Vec<String>,

    /// Replace an existing action and its data
    #[arg(long)]
    pub overwrite: bool,

    /// Delete the raw data after conversion without asking
    #[arg(long, conflicts_with = "keep_raw")]
    pub delete_raw: bool,

    /// Keep the raw data without asking
    #[arg(long)]
    pub keep_raw: bool,
}

impl RegisterArgs {
    fn depth_source(&self) -> anyhow::Result<DepthSource> {
        if self.depth.is_empty() {
            return Ok(DepthSource::Find);
        }
        let entries = self
            .depth
            .chunks(4)
            .map(DepthEntry::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DepthSource::Explicit(entries))
    }

    fn delete_raw_answer(&self) -> Option<bool> {
        match (self.delete_raw, self.keep_raw) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

pub fn run(root: &Path, args: RegisterArgs, json: bool) -> anyhow::Result<()> {
    let cfg = load_config(root)?;
    let system = args
        .system
        .as_deref()
        .map(str::parse::<AcquisitionSystem>)
        .transpose()?;

    let mut req = RecordingRequest::new(args.raw_path.clone(), now());
    req.action_id = args.action_id.clone();
    req.system = system;
    req.entity_id = args.entity_id.clone();
    req.session = args.session.clone();
    req.user = args.user.clone();
    req.location = args.location.clone();
    req.tags = args.tags.clone();
    req.messages = args.messages.clone();
    req.depth = args.depth_source()?;
    req.register_depth = args.register_depth || !args.depth.is_empty();
    req.depth_confirmed = args.confirm_depth.then_some(true);
    req.templates = args.templates.clone();
    req.overwrite = args.overwrite;
    req.delete_raw = args.delete_raw_answer();

    let outcome = register_recording(
        root,
        &cfg,
        &req,
        RegisterDeps {
            reader: None,
            converter: &RawCopyConverter,
            confirm: &mut StdinConfirm,
        },
    )
    .with_context(|| format!("failed to register '{}'", args.raw_path.display()))?;

    if json {
        print_json(&outcome)?;
    } else {
        println!("Registered action: {}", outcome.action_id);
        println!("  data: {}", outcome.container.display());
        if outcome.raw_deleted {
            println!("  deleted raw data: {}", args.raw_path.display());
        }
    }
    Ok(())
}
