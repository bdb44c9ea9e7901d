use crate::cmd::load_config;
use crate::output::{print_json, print_warnings};
use anyhow::Context;
use clap::Args;
use cinpla_core::{
    channels::{BadChannels, Grouping, ReferenceMode},
    config::Config,
    process::{self, ProcessDeps, ProcessOutcome, ProcessRequest, Target},
    processing::{PipelineReport, ProcessingOptions},
    remote::SshConnector,
    sorter::Sorter,
    toolkit::ExternalToolkit,
    CinplaError,
};
use std::path::{Path, PathBuf};

/// Flags shared by `process` and `process-dir`. Servers receive them
/// verbatim from the handoff.
#[derive(Args)]
pub struct PipelineArgs {
    /// Spike sorter: klusta, mountain, kilosort, spyking-circus or ironclust
    #[arg(long, default_value = "klusta")]
    pub sorter: String,

    /// Probe file
    #[arg(long)]
    pub probe_path: Option<PathBuf>,

    /// YAML file with sorter parameters (default: sorter_params in config)
    #[arg(long)]
    pub sorter_params: Option<PathBuf>,

    #[arg(long)]
    pub no_sorting: bool,

    #[arg(long)]
    pub no_lfp: bool,

    #[arg(long)]
    pub no_mua: bool,

    /// Channel indices to exclude, or `auto`
    #[arg(long, num_args = 1..)]
    pub bad_channels: Vec<String>,

    /// Re-referencing: cmr, car or none
    #[arg(long = "ref", default_value = "cmr")]
    pub reference: String,

    /// Process each channel group of the probe separately
    #[arg(long)]
    pub split_probe: bool,

    /// Waveform window before each spike, in ms
    #[arg(long, default_value_t = 1.0)]
    pub ms_before: f64,

    /// Waveform window after each spike, in ms
    #[arg(long, default_value_t = 2.0)]
    pub ms_after: f64,

    /// LFP band in Hz (default: processing.lfp_band in config)
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
    pub lfp_band: Option<Vec<f64>>,

    /// MUA band in Hz (default: processing.mua_band in config)
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
    pub mua_band: Option<Vec<f64>>,

    #[arg(long)]
    pub parallel: bool,
}

fn band(values: Option<&[f64]>, default: [f64; 2]) -> [f64; 2] {
    match values {
        Some([low, high]) => [*low, *high],
        _ => default,
    }
}

impl PipelineArgs {
    fn options(&self, cfg: &Config) -> anyhow::Result<ProcessingOptions> {
        let sorter = Sorter::lookup(&self.sorter)?;
        let mut opts = ProcessingOptions::new(sorter, &cfg.processing);
        opts.sorter_params = sorter.params(cfg, self.sorter_params.as_deref())?;
        opts.sorting = !self.no_sorting;
        opts.lfp = !self.no_lfp;
        opts.mua = !self.no_mua;
        opts.bad_channels = BadChannels::parse(&self.bad_channels)?;
        opts.reference = self.reference.parse::<ReferenceMode>()?;
        opts.grouping = Grouping::from_split_probe(self.split_probe);
        opts.ms_before = self.ms_before;
        opts.ms_after = self.ms_after;
        opts.lfp_band = band(self.lfp_band.as_deref(), opts.lfp_band);
        opts.mua_band = band(self.mua_band.as_deref(), opts.mua_band);
        opts.parallel = self.parallel;
        Ok(opts)
    }
}

#[derive(Args)]
pub struct ProcessArgs {
    pub action_id: String,

    /// Server name from config, or `local`
    #[arg(long, default_value = "local")]
    pub server: String,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Args)]
pub struct ProcessDirArgs {
    /// Acquisition directory
    pub acquisition: PathBuf,

    /// Container directory receiving the results
    #[arg(long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

pub fn run(root: &Path, args: ProcessArgs, json: bool) -> anyhow::Result<()> {
    let cfg = load_config(root)?;
    let req = ProcessRequest {
        action_id: args.action_id.clone(),
        target: Target::parse(&args.server),
        probe: args.pipeline.probe_path.clone(),
        options: args.pipeline.options(&cfg)?,
    };
    let toolkit = ExternalToolkit::from_config(&cfg.toolkit);
    let connector = SshConnector::default();

    // Remote output goes to stderr so --json stays parseable.
    let mut on_line = |line: &str| eprintln!("{line}");
    let outcome = process::process_action(
        root,
        &cfg,
        &req,
        ProcessDeps {
            toolkit: &toolkit,
            connector: &connector,
        },
        &mut on_line,
    )
    .with_context(|| format!("failed to process '{}' on {}", args.action_id, req.target))?;

    if json {
        return print_json(&outcome);
    }
    match &outcome {
        ProcessOutcome::Local(report) => print_report(&args.action_id, report),
        ProcessOutcome::Remote(report) => {
            print_warnings(&report.warnings);
            println!("Processed {} on {}", args.action_id, report.server);
            if let Some(detected) = &report.detected_bad_channels {
                println!("  detected bad channels: {detected:?}");
            }
        }
    }
    Ok(())
}

/// Without a project the built-in defaults apply.
fn config_or_default(root: &Path) -> anyhow::Result<Config> {
    match Config::load(root) {
        Ok(cfg) => Ok(cfg),
        Err(CinplaError::NotInitialized) => Ok(Config::new("process-dir")),
        Err(e) => Err(e).context("failed to load config"),
    }
}

pub fn run_dir(root: &Path, args: ProcessDirArgs, json: bool) -> anyhow::Result<()> {
    let cfg = config_or_default(root)?;
    let opts = args.pipeline.options(&cfg)?;
    let toolkit = ExternalToolkit::from_config(&cfg.toolkit);

    let report = process::process_dir(
        &args.acquisition,
        &args.output,
        args.pipeline.probe_path.as_deref(),
        &opts,
        &toolkit,
    )
    .with_context(|| format!("failed to process '{}'", args.acquisition.display()))?;

    if json {
        return print_json(&report);
    }
    print_report(&args.acquisition.display().to_string(), &report);
    Ok(())
}

fn print_report(what: &str, report: &PipelineReport) {
    println!("Processed {what}: {}", report.steps.join(", "));
    if let Some(detected) = &report.detected_bad_channels {
        println!("  detected bad channels: {detected:?}");
    }
}
