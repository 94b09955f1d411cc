//! `docflow-core`: shared building blocks for the docflow crates.
//!
//! Identifiers, the domain error model, and the entity/value-object markers.
//! No infrastructure concerns live here.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{JobId, SubmissionId, UserId};
pub use value_object::ValueObject;
