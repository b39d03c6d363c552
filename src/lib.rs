//! capability grants: parse, normalise and compare per-resource operation
//! sets.
//!
//! a [`Capability`] pairs a resource key (e.g. `posts`) with the operations a
//! principal may perform on it (e.g. `read`, `write`), written compactly as
//! `posts:read,write`. a [`Capabilities`] collection aggregates them into
//! everything a principal may do, with set-style merge, subtraction and
//! containment comparison. validation runs against an explicit
//! [`OperationRegistry`] vocabulary; a set covering the whole vocabulary is
//! canonically collapsed to the `any` wildcard.

#![warn(missing_docs)]

pub mod capability;
pub mod collection;
pub mod error;
pub mod registry;

pub use capability::{Capability, ANY};
pub use collection::Capabilities;
pub use error::{Error, Result};
pub use registry::{OperationRegistry, DEFAULT_OPERATIONS};
