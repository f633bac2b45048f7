//! An OCI Distribution client for pulling image manifests and blobs from an OCI
//! compliant remote store onto the local file system
#![cfg_attr(not(test), deny(missing_docs))]

pub mod auth;
pub mod blob;
pub mod client;
pub mod errors;
pub mod manifest;
pub mod progress;
pub mod pull;
mod reference;
#[cfg(test)]
mod test_util;

#[doc(inline)]
pub use client::Client;
#[doc(inline)]
pub use errors::PullError;
#[doc(inline)]
pub use pull::Puller;
#[doc(inline)]
pub use reference::{ParseError, Reference};
