use crate::cmd::{load_config, now};
use crate::output::{print_json, print_warnings};
use anyhow::Context;
use chrono::NaiveDate;
use clap::Args;
use cinpla_core::{
    action::{parse_datetime, Action, ActionStore},
    quantity::{Position, Quantity},
    subject::{self, Procedure, SubjectRequest, SurgeryRequest},
};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Args)]
pub struct SurgeryArgs {
    pub subject: String,

    /// Date as dd.mm.yyyyTHH:MM, or `now`
    #[arg(short, long)]
    pub date: String,

    /// implantation or injection
    #[arg(long)]
    pub procedure: String,

    /// Subject weight
    #[arg(short, long, num_args = 2, value_names = ["VALUE", "UNIT"])]
    pub weight: Vec<String>,

    /// Position as key,x,y,z,unit, repeatable
    #[arg(short, long = "position")]
    pub positions: Vec<String>,

    /// Probe angle in degrees
    #[arg(long)]
    pub angle: Option<f64>,

    #[arg(short, long)]
    pub user: Option<String>,

    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Args)]
pub struct PerfusionArgs {
    pub subject: String,

    /// Date as dd.mm.yyyyTHH:MM, or `now`
    #[arg(short, long, default_value = "now")]
    pub date: String,

    #[arg(short, long)]
    pub user: Option<String>,

    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Args)]
pub struct SubjectArgs {
    pub subject: String,

    /// Birthday as dd.mm.yyyy
    #[arg(long)]
    pub birthday: String,

    #[arg(long)]
    pub cell_line: String,

    #[arg(long)]
    pub developmental_stage: Option<String>,
    #[arg(long)]
    pub gender: Option<String>,
    #[arg(long)]
    pub genus: Option<String>,
    #[arg(long)]
    pub health_status: Option<String>,
    #[arg(long)]
    pub label: Option<String>,
    #[arg(long)]
    pub population: Option<String>,
    #[arg(long)]
    pub species: Option<String>,
    #[arg(long)]
    pub strain: Option<String>,
    #[arg(long)]
    pub trivial_name: Option<String>,
    #[arg(long)]
    pub weight: Option<String>,

    #[arg(short, long)]
    pub user: Option<String>,

    #[arg(long)]
    pub overwrite: bool,
}

impl SubjectArgs {
    fn fields(&self) -> BTreeMap<String, String> {
        [
            ("developmental_stage", &self.developmental_stage),
            ("gender", &self.gender),
            ("genus", &self.genus),
            ("health_status", &self.health_status),
            ("label", &self.label),
            ("population", &self.population),
            ("species", &self.species),
            ("strain", &self.strain),
            ("trivial_name", &self.trivial_name),
            ("weight", &self.weight),
        ]
        .into_iter()
        .filter_map(|(k, v)| Some((k.to_string(), v.clone()?)))
        .collect()
    }
}

fn parse_weight(values: &[String]) -> anyhow::Result<Quantity> {
    match values {
        [value, unit] => {
            let value: f64 = value
                .parse()
                .with_context(|| format!("weight '{value}' is not a number"))?;
            Ok(Quantity::new(value, unit.as_str()))
        }
        _ => anyhow::bail!("missing option 'weight': give a value and a unit"),
    }
}

fn print_action(action: &Action, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(action);
    }
    println!("Registered {}", action.id);
    for name in action.modules.keys() {
        println!("  module: {name}");
    }
    Ok(())
}

pub fn surgery(root: &Path, args: SurgeryArgs, json: bool) -> anyhow::Result<()> {
    let cfg = load_config(root)?;
    let positions = args
        .positions
        .iter()
        .map(|p| Position::parse_keyed(p))
        .collect::<Result<Vec<_>, _>>()?;
    let req = SurgeryRequest {
        subject: args.subject.clone(),
        procedure: args.procedure.parse::<Procedure>()?,
        date: parse_datetime(&args.date, now())?,
        user: cfg.resolve_user(args.user.as_deref())?,
        weight: parse_weight(&args.weight)?,
        positions,
        angle: args.angle,
        overwrite: args.overwrite,
    };
    let action = subject::register_surgery(&ActionStore::project(root), &cfg, &req)
        .with_context(|| format!("failed to register surgery for '{}'", args.subject))?;
    print_action(&action, json)
}

pub fn perfusion(root: &Path, args: PerfusionArgs, json: bool) -> anyhow::Result<()> {
    let cfg = load_config(root)?;
    let action = subject::register_perfusion(
        &ActionStore::project(root),
        &cfg,
        &args.subject,
        parse_datetime(&args.date, now())?,
        &cfg.resolve_user(args.user.as_deref())?,
        args.overwrite,
    )
    .with_context(|| format!("failed to register perfusion for '{}'", args.subject))?;
    print_action(&action, json)
}

pub fn subject(root: &Path, args: SubjectArgs, json: bool) -> anyhow::Result<()> {
    let cfg = load_config(root)?;
    let birthday = NaiveDate::parse_from_str(&args.birthday, "%d.%m.%Y")
        .with_context(|| format!("birthday '{}' must be dd.mm.yyyy", args.birthday))?;
    let req = SubjectRequest {
        subject: args.subject.clone(),
        birthday,
        cell_line: args.cell_line.clone(),
        fields: args.fields(),
        user: cfg.resolve_user(args.user.as_deref()).ok(),
        overwrite: args.overwrite,
        now: now(),
    };
    let outcome = subject::register_subject(&ActionStore::subjects(root), &cfg, &req)
        .with_context(|| format!("failed to register subject '{}'", args.subject))?;

    if json {
        return print_json(&outcome);
    }
    let missing: Vec<String> = outcome
        .missing
        .iter()
        .map(|f| format!("no value for '{f}'"))
        .collect();
    print_warnings(&missing);
    println!("Registered subject {}", outcome.subject);
    Ok(())
}
