//! Stored credential handling

pub mod cipher;
pub mod store;
