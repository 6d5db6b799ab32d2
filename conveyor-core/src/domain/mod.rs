//! Core domain types
//!
//! This module contains the core domain structures used across Conveyor services.
//! These types are shared between the orchestrator (which persists and mutates them)
//! and clients (which display them).

pub mod approval;
pub mod artifact;
pub mod manifest;
pub mod revision;
pub mod run;
pub mod target;
