//! Conveyor Orchestrator
//!
//! Runs release pipelines: a push on the target branch starts a run that moves
//! through Source, Build, Approve and Deploy, handing sealed artifacts from one
//! stage to the next.

pub mod admission;
pub mod api;
pub mod artifact;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
pub mod stage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
