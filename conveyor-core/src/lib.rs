//! Conveyor Core
//!
//! Core types and abstractions for the Conveyor release pipeline.
//!
//! This crate contains:
//! - Domain types: runs, stages, artifacts, manifests, approvals and deployment targets
//! - Error taxonomy: stage failures and the serializable error kinds reported on runs
//! - DTOs: Data transfer objects shared by the orchestrator API and its clients

pub mod domain;
pub mod dto;
pub mod error;
