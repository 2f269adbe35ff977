//! Dagmon Core
//!
//! Core types for the dagmon task monitoring system.
//!
//! This crate contains:
//! - Domain types: node lifecycle state, per-node run histories, task records
//! - Event types: the job event log wire records
//! - Retry types: classifier outcomes and decisions

pub mod domain;
