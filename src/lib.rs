//! orgform: organization-wide CloudFormation binding.
//!
//! One template describes resources for a whole multi-account organization.
//! The binder resolves account and region targeting into concrete
//! (account, region) targets and renders one deployable template per target,
//! resolving cross-account references from persisted state on demand.

pub mod cli;
pub mod core;
