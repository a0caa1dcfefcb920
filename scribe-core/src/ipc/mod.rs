//! Caller-facing types serialised across the host bridge.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host (web
//! worker bridge, desktop shell, CLI) can forward them as JSON.

pub mod events;
