//! Pipeline metadata persistence for the driftsync engine.
//!
//! Provides the [`MetadataStore`] trait and a [`SqliteMetadataStore`]
//! implementation tracking each pipeline's watermark and last-run outcome.

#![warn(clippy::pedantic)]

pub mod error;
pub mod sqlite;
pub mod store;

pub use error::StateError;
pub use sqlite::SqliteMetadataStore;
pub use store::MetadataStore;
