//! Side-effecting operations: process execution, contexts and configuration.

pub mod config;
pub mod context;
pub mod process;
pub mod runner;
