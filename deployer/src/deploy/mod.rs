//! Deployment pipeline: request, inventory, runner, classification, job

pub mod classify;
pub mod inventory;
pub mod job;
pub mod request;
pub mod runner;
