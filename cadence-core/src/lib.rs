//! Cadence Core
//!
//! Domain types for the Cadence scheduler: jobs, cron templates, conditions
//! and the typed pipeline params/results they carry.

pub mod domain;
