//! Data Transfer Objects for the orchestrator API
//!
//! DTOs are lightweight representations of domain entities used on the wire
//! between the orchestrator and its clients.

pub mod approval;
pub mod artifact;
pub mod run;
pub mod trigger;
