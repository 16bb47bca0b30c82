//! Catalog records for the project store.

pub mod project;
pub mod remix;

pub use project::{NewProject, Project};
pub use remix::{Ancestor, RemixEdge};
