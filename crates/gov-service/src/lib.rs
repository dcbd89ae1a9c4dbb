//! # gov-service
//!
//! The boundary of the governance subsystem.
//!
//! [`GovernanceService`] wires principles, validation, synthesis and the
//! decision engine together and exposes the operations the rest of the
//! platform calls:
//!
//! - `synthesize_now(trigger)`: force an out-of-cycle synthesis pass
//! - `evaluate(proposal)`: the enforcement call; always returns a decision
//! - `snapshot_version()` / `list_active_rules()`: introspection
//! - `approve(id)` / `reject(id, reason)`: the human approval gate
//! - `revoke_rule(id, reason)` / `rollback_to(version)`: rule lifecycle
//!
//! Configuration comes from `governance.toml` via [`GovernanceConfig`].

pub mod config;
pub mod error;
pub mod service;

pub use config::{GovernanceConfig, StorageConfig};
pub use error::ServiceError;
pub use service::{Collaborators, GovernanceService};
