//! Errors related to pulling from an OCI compliant remote store

use std::path::PathBuf;

use thiserror::Error;

use crate::reference::ParseError;

/// Every way a `list` or `pull` can fail.
///
/// None of these are recovered from locally: the first one raised ends the
/// whole operation.
#[derive(Debug, Error)]
pub enum PullError {
    /// The image reference could not be parsed
    #[error("invalid image reference {reference:?}")]
    InvalidReference {
        /// The reference as given
        reference: String,
        /// Why it was rejected
        #[source]
        source: ParseError,
    },
    /// The registry's `WWW-Authenticate` challenge is missing a required field
    #[error("unusable WWW-Authenticate challenge: {0}")]
    AuthChallenge(String),
    /// The challenge could not be exchanged for a bearer token
    #[error("failed to obtain a bearer token from {realm}: {reason}")]
    AuthExchange {
        /// The token endpoint named by the challenge
        realm: String,
        /// What went wrong
        reason: String,
    },
    /// The registry answered with a non-success status after the
    /// authentication retry was exhausted
    #[error(
        "registry returned status {status} for {url}{}",
        .message.as_deref().map(|m| format!(" ({})", m)).unwrap_or_default()
    )]
    Registry {
        /// The HTTP status code
        status: u16,
        /// The requested URL
        url: String,
        /// The first message of the OCI error envelope, if the body had one
        message: Option<String>,
    },
    /// A JSON response body was malformed
    #[error("failed to decode {what}")]
    Decode {
        /// The document being decoded
        what: String,
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },
    /// A digest was not of the form `<algorithm>:<hex>`
    #[error("invalid digest {0:?}")]
    InvalidDigest(String),
    /// A request could not be sent or its body could not be read
    #[error("request to {url} failed")]
    Transport {
        /// The requested URL
        url: String,
        /// The underlying HTTP error
        #[source]
        source: reqwest::Error,
    },
    /// A blob transfer failed after the destination file was opened
    #[error("failed to download {url} to {}", .path.display())]
    Download {
        /// The blob URL
        url: String,
        /// The destination file, left in place
        path: PathBuf,
        /// What interrupted the transfer
        #[source]
        source: DownloadFailure,
    },
    /// The destination directory could not be created
    #[error("failed to create directory {}", .path.display())]
    Layout {
        /// The directory
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// What interrupted a blob transfer.
#[derive(Debug, Error)]
pub enum DownloadFailure {
    /// The response body stream failed
    #[error("transfer interrupted")]
    Stream(#[source] reqwest::Error),
    /// The destination file could not be created or written
    #[error("write failed")]
    Io(#[source] std::io::Error),
}

/// The OCI specification defines a specific error format.
///
/// This struct represents that error format, which is formally described here:
/// https://github.com/opencontainers/distribution-spec/blob/master/spec.md#errors-2
#[derive(serde::Deserialize, Debug)]
pub struct OciError {
    /// The error code
    pub code: OciErrorCode,
    /// An optional message associated with the error
    #[serde(default)]
    pub message: String,
    /// Unstructured optional data associated with the error
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl std::error::Error for OciError {}

impl std::fmt::Display for OciError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{:?}", self.code)
        } else {
            write!(f, "{:?}: {}", self.code, self.message)
        }
    }
}

#[derive(serde::Deserialize)]
pub(crate) struct OciEnvelope {
    pub(crate) errors: Vec<OciError>,
}

impl OciEnvelope {
    /// Renders the first error of an envelope body, if the body is one.
    pub(crate) fn first_message(body: &str) -> Option<String> {
        serde_json::from_str::<OciEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.errors.into_iter().next())
            .map(|e| e.to_string())
    }
}

/// OCI error codes
///
/// Outlined here: https://github.com/opencontainers/distribution-spec/blob/master/spec.md#errors-2
#[derive(serde::Deserialize, Debug, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OciErrorCode {
    /// Blob unknown to registry
    BlobUnknown,
    /// Blob upload is invalid
    BlobUploadInvalid,
    /// Blob upload is unknown to registry
    BlobUploadUnknown,
    /// Provided digest did not match uploaded content.
    DigestInvalid,
    /// Blob is unknown to registry
    ManifestBlobUnknown,
    /// Manifest is invalid
    ManifestInvalid,
    /// Manifest unknown
    ///
    /// This error is returned when the manifest, identified by name and tag is unknown to the repository.
    ManifestUnknown,
    /// Invalid repository name
    NameInvalid,
    /// Repository name is not known
    NameUnknown,
    /// Provided length did not match content length
    SizeInvalid,
    /// Authentication required.
    Unauthorized,
    /// Requested access to the resource is denied
    Denied,
    /// This operation is unsupported
    Unsupported,
    /// Too many requests from client
    Toomanyrequests,
}
