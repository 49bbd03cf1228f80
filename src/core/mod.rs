//! Core domain models for deployments
//!
//! This module defines the fundamental data structures that represent
//! deployment plans, steps, resources and their configuration.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod resource;
pub mod state;
pub mod step;

pub use condition::{Condition, ConditionCheck, Observation};
pub use context::*;
pub use error::{DeployError, ErrorClass, ErrorKind};
pub use pipeline::*;
pub use resource::{ResourceDefinition, ResourceKind};
pub use state::*;
pub use step::*;
