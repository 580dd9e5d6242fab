//! Compute configuration and job template resolution for xnat-jupyter.
//!
//! This crate owns the administrable compute resources (environments, hardware
//! profiles, placement constraints, dashboards) and turns an authorized
//! (environment, hardware) pair into a ready-to-launch [`JobTemplate`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               JobTemplateResolver (+ dashboard)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼──────────────────────┐
//!        ▼                     ▼                      ▼
//! ┌─────────────┐   ┌────────────────────┐   ┌───────────────┐
//! │ Environment │   │      Hardware      │   │  Constraint   │
//! │   configs   │   │      configs       │   │    configs    │
//! └──────┬──────┘   └─────────┬──────────┘   └───────────────┘
//!        └──────────┬─────────┘
//!                   ▼
//!      HardwareAssociationManager ──► Store (RocksDB)
//! ```
//!
//! Every availability decision goes through a [`xnat_jupyter_core::ScopeEngine`]
//! and fails closed. Deleting an environment or hardware config that a dashboard
//! pins is refused with `Conflict`; [`GuardedDelete`] applies other usage checks.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use xnat_jupyter_compute::{DefaultJobTemplateResolver, JobTemplateResolver};
//! use xnat_jupyter_core::{ConfigId, ExecutionScope};
//! use xnat_jupyter_store::RocksStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/xnat-jupyter")?);
//! let resolver = DefaultJobTemplateResolver::new(store);
//!
//! let exec = ExecutionScope::new().user("admin").project("p1");
//! let template = resolver.resolve(&exec, ConfigId::new(1), ConfigId::new(2))?;
//! println!("image: {}", template.compute_environment.image);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod associations;
pub mod constraint;
pub mod dashboard;
pub mod environment;
pub mod error;
pub mod guard;
pub mod hardware;
pub mod resolver;
pub mod template;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use associations::HardwareAssociationManager;
pub use constraint::ConstraintConfigService;
pub use dashboard::{DashboardConfigService, DashboardFrameworkService};
pub use environment::ComputeEnvironmentConfigService;
pub use error::{ComputeError, Result};
pub use guard::{ConfigDeleter, DashboardPins, GuardedDelete, Pin, UsageCheck};
pub use hardware::HardwareConfigService;
pub use resolver::{
    DashboardJobTemplateResolver, DashboardTemplateResolver, DefaultJobTemplateResolver,
    JobTemplateResolver,
};
pub use template::JobTemplate;
