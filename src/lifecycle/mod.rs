//! Application lifecycle (C7): infra-only actor supervision.
//!
//! Startup/shutdown ordering itself lives in `main`; this module only
//! supplies the supervised actors `main` starts and stops.

pub mod coordinator;
pub mod health;

pub use coordinator::CoordinatorActor;
