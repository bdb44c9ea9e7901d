mod cmd;
mod output;
mod prompt;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    action::ActionSubcommand, adjust::AdjustArgs, config::ConfigSubcommand,
    process::{ProcessArgs, ProcessDirArgs},
    register::RegisterArgs,
    subject::{PerfusionArgs, SubjectArgs, SurgeryArgs},
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cinpla",
    about = "Register electrophysiology recordings and process them locally or on a server",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .expipe/)
    #[arg(long, global = true, env = "CINPLA_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a project in the current directory
    Init {
        /// Project id (default: directory name)
        #[arg(long)]
        project_id: Option<String>,
    },

    /// Register an Open Ephys or Axona recording
    Register(RegisterArgs),

    /// Process a registered recording, locally or on a server
    Process(ProcessArgs),

    /// Process an acquisition directory (run by servers)
    ProcessDir(ProcessDirArgs),

    /// Register a drive depth adjustment
    Adjust(AdjustArgs),

    /// Add tags, messages and a user to an action
    Annotate {
        action_id: String,
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        #[arg(short, long = "message")]
        messages: Vec<String>,
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Register an implantation or injection surgery
    RegisterSurgery(SurgeryArgs),

    /// Register a perfusion
    RegisterPerfusion(PerfusionArgs),

    /// Register a subject in the subjects registry
    RegisterSubject(SubjectArgs),

    /// Import PsychoPy visual stimuli of a recording
    Psychopy { action_id: String },

    /// Import trackball motion of a recording
    Mousexy {
        action_id: String,
        /// Seconds from the first TTL event to the start of mouse logging
        #[arg(long, default_value_t = cinpla_core::trackball::DEFAULT_TIME_OFFSET, allow_hyphen_values = true)]
        time_offset: f64,
    },

    /// Inspect actions
    Action {
        #[command(subcommand)]
        subcommand: ActionSubcommand,
    },

    /// Inspect the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Process(_) | Commands::ProcessDir(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let json = cli.json;

    let result = match cli.command {
        Commands::Init { project_id } => cmd::init::run(&root, project_id.as_deref(), json),
        Commands::Register(args) => cmd::register::run(&root, args, json),
        Commands::Process(args) => cmd::process::run(&root, args, json),
        Commands::ProcessDir(args) => cmd::process::run_dir(&root, args, json),
        Commands::Adjust(args) => cmd::adjust::run(&root, args, json),
        Commands::Annotate {
            action_id,
            tags,
            messages,
            user,
        } => cmd::annotate::run(&root, &action_id, &tags, &messages, user.as_deref(), json),
        Commands::RegisterSurgery(args) => cmd::subject::surgery(&root, args, json),
        Commands::RegisterPerfusion(args) => cmd::subject::perfusion(&root, args, json),
        Commands::RegisterSubject(args) => cmd::subject::subject(&root, args, json),
        Commands::Psychopy { action_id } => cmd::import::psychopy(&root, &action_id, json),
        Commands::Mousexy {
            action_id,
            time_offset,
        } => cmd::import::mousexy(&root, &action_id, time_offset, json),
        Commands::Action { subcommand } => cmd::action::run(&root, subcommand, json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
