//! Side-effecting helpers: configuration, rule files, the change database,
//! project lists, and child processes.

pub mod config;
pub mod database;
pub mod process;
pub mod projects;
pub mod rules;
