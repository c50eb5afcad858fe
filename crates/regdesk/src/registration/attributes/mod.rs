//! Attribute typing, per-type dispatch of submitted fields, and catalog administration.

pub mod catalog;
pub mod dispatcher;
pub mod kind;

pub use catalog::{AttributeCatalog, CatalogError};
pub use dispatcher::{AttributeDispatcher, Dispatched};
pub use kind::{FieldKind, FieldSpec, FormSchema};
