//! Shared test fixtures.

pub mod test_server;
