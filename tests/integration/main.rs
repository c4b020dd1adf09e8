//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises a subsystem against mock
//! collaborators and an in-memory peer. All tests run on the host with no
//! real hardware required.

mod link_tests;
mod mocks;
mod peer;
mod store_tests;
