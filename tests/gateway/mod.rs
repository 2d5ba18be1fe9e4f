//! Gateway session tests against the fake gateway.

mod session_tests;
