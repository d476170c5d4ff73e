//! HTTP front-end

pub mod guard;
pub mod handlers;
pub mod serve;
pub mod state;
pub mod views;
