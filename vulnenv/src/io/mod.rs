//! Side-effecting helpers: files, child processes, templates.

pub mod config;
pub mod dataset;
pub mod policy;
pub mod process;
pub mod prompt;
pub mod trajectory_log;
