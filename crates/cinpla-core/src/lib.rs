pub mod acquisition;
pub mod action;
pub mod adjust;
pub mod archive;
pub mod channels;
pub mod config;
pub mod confirm;
pub mod container;
pub mod convert;
pub mod depth;
pub mod error;
pub mod io;
pub mod paths;
pub mod process;
pub mod processing;
pub mod quantity;
pub mod register;
pub mod remote;
pub mod sorter;
pub mod stimulus;
pub mod subject;
pub mod toolkit;
pub mod trackball;

pub use error::{CinplaError, Result};
