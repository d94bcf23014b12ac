//! Core binder logic: model types, parsing, state, resolution, enumeration, rendering.

pub mod binder;
pub mod error;
pub mod hasher;
pub mod parser;
pub mod resolver;
pub mod state;
pub mod template;
pub mod types;

pub use binder::{CfnBinding, CloudFormationBinder};
pub use error::{OrgError, Result};
pub use state::PersistedState;
pub use template::{BoundParameter, CfnTemplate};
pub use types::TemplateRoot;
