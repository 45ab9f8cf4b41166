pub mod cache;
pub mod config;
pub mod domains;
pub mod entitlements;
pub mod error;
pub mod factories;
pub mod interfaces;
pub mod providers;
pub mod server;
pub mod services;
pub mod session;
pub mod usage;

pub use crate::config::Config;
pub use crate::error::{ParleyError, Result};
pub use crate::interfaces::storage::{BackendKind, StorageBackend};
pub use crate::services::queries::QueryService;
pub use crate::usage::ClientUsage;
