#![forbid(unsafe_code)]

pub mod build;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod clock;
pub mod cover;
pub mod error;
pub mod formats;
pub mod job_log;
pub mod logging;
pub mod markup;
pub mod metadata;
pub mod naming;
pub mod orchestrator;
pub mod recipe;
pub mod runner;
pub mod schedule;
