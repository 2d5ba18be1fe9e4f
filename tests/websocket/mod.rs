//! WebSocket client/server tests.

mod client_server_tests;
mod failure_tests;
