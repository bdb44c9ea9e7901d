pub mod action;
pub mod adjust;
pub mod annotate;
pub mod config;
pub mod import;
pub mod init;
pub mod process;
pub mod register;
pub mod subject;

use anyhow::Context;
use chrono::NaiveDateTime;
use cinpla_core::config::Config;
use std::path::Path;

pub(crate) fn load_config(root: &Path) -> anyhow::Result<Config> {
    Config::load(root).with_context(|| format!("failed to load config in {}", root.display()))
}

pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
