//! Nessus Agent Deployer Library
//!
//! Core modules for the Nessus agent deployment front-end.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod secrets;
pub mod server;
pub mod storage;
pub mod utils;
