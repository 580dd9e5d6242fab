//! Core types and scope evaluation for xnat-jupyter.
//!
//! This crate provides the foundations shared by the rest of the workspace:
//!
//! - **Identifiers**: `ConfigId`, `UserId` and `TrackingId`
//! - **Scopes**: `Scope`, `ScopeSetting`, `ExecutionScope` and the `ScopeEngine`
//! - **Principals**: `XnatUser`
//!
//! # Example
//!
//! ```
//! use xnat_jupyter_core::{scope_map, ExecutionScope, Scope, ScopeSetting, is_enabled_for};
//!
//! let scopes = scope_map([
//!     ScopeSetting::open(Scope::Site),
//!     ScopeSetting::restricted(Scope::User, ["u1"]),
//!     ScopeSetting::restricted(Scope::Project, ["p1"]),
//! ]);
//!
//! let exec = ExecutionScope::new().user("u1").project("p1");
//! assert!(is_enabled_for(&scopes, &exec));
//!
//! let other = ExecutionScope::new().user("u2").project("p1");
//! assert!(!is_enabled_for(&scopes, &other));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod scope;
pub mod user;

pub use error::{CoreError, Result};
pub use ids::{ConfigId, IdError, TrackingId, UserId};
pub use scope::{
    is_enabled_for, scope_map, ExecutionScope, Scope, ScopeEngine, ScopeMap, ScopeSetting,
    Scoped, CONSTRAINT_SCOPES, DASHBOARD_SCOPES, ENVIRONMENT_SCOPES, HARDWARE_SCOPES,
};
pub use user::XnatUser;
