//! Application-facing surface of the link: domain values, events, typed
//! commands, and the port traits collaborators implement.
//!
//! Nothing in here touches the transport; the [`link`](crate::link) module
//! drives these through the ports.

pub mod commands;
pub mod events;
pub mod model;
pub mod ports;
