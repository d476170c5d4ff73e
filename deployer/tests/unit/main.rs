//! Integration tests

mod test_inventory;
mod test_job;
mod test_runner;
mod test_server;
