// src/schedule/mod.rs

//! Run triggering: cron parsing and tick planning.
//!
//! - [`cron`] parses and evaluates five-field cron expressions.
//! - [`trigger`] decides which ticks become runs (startup catchup, the
//!   live ticker).

pub mod cron;
pub mod trigger;

pub use cron::CronSchedule;
pub use trigger::{TickPlanner, spawn_ticker};
