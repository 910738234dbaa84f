//! Fitness-norm grading engine and the JSON-lines sidecar that hosts it.
//!
//! The pure core (`gender`, `boundary`, `grading`, `eligibility`, `results`,
//! `progress`) works on plain values; `store` persists them in the workspace
//! SQLite file and `ipc` exposes both over stdin/stdout.

pub mod boundary;
pub mod config;
pub mod db;
pub mod eligibility;
pub mod error;
pub mod gender;
pub mod grading;
pub mod ipc;
pub mod model;
pub mod progress;
pub mod results;
pub mod store;
