//! Destination transports.
//!
//! The [`backend::UploadTransport`] trait abstracts over where migrated
//! objects are written.  Implementations cover S3-compatible services and
//! a local directory tree.

pub mod backend;
pub mod local;
pub mod s3;

pub use backend::{TransportSet, UploadTransport};
