//! # SpendGuard SDK
//!
//! Client SDK for interacting with SpendGuard nodes.

pub mod client;
pub mod error;
pub mod stream;

pub use client::SpendGuardClient;
pub use error::{ClientError, ClientResult};
pub use stream::{IntakeStream, RecordEvent, RecordStream};

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::client::SpendGuardClient;
    pub use crate::error::{ClientError, ClientResult};
    pub use crate::stream::{IntakeStream, RecordEvent, RecordStream};
    pub use spendguard_core::prelude::*;
}
