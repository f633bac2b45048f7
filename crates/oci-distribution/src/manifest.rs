//! OCI Manifest
use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::PullError;

/// The mediatype for a Docker v2 schema 2 manifest.
pub const IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// The mediatype for an OCI image manifest.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// The single-image manifest types requested from a registry.
pub(crate) const MIME_TYPES_DISTRIBUTION_MANIFEST: &[&str] =
    &[IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE];

// https://github.com/opencontainers/image-spec/blob/master/descriptor.md#digests
const DIGEST_ALGORITHM: &str = r"^[a-z0-9]+(?:[+._-][a-z0-9]+)*$";
const DIGEST_ENCODED: &str = r"^[a-zA-Z0-9=_-]+$";

lazy_static! {
    static ref DIGEST_ALGORITHM_REGEXP: Regex =
        Regex::new(DIGEST_ALGORITHM).expect("digest algorithm pattern compiles");
    static ref DIGEST_ENCODED_REGEXP: Regex =
        Regex::new(DIGEST_ENCODED).expect("digest encoding pattern compiles");
}

/// The OCI manifest describes an OCI image.
///
/// It is part of the OCI specification, and is defined here:
/// https://github.com/opencontainers/image-spec/blob/master/manifest.md
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    /// This is a schema version.
    ///
    /// The only version registries serve for single images is `2`.
    pub schema_version: i32,

    /// The media type describing this manifest.
    ///
    /// Docker registries always send it, OCI registries may leave it out.
    pub media_type: Option<String>,

    /// The image configuration.
    pub config: OciDescriptor,

    /// The image layers, in the order they are applied.
    pub layers: Vec<OciDescriptor>,
}

/// The OCI descriptor is a generic object used to describe other objects.
///
/// It is defined in the OCI Image Specification:
/// https://github.com/opencontainers/image-spec/blob/master/descriptor.md#properties
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciDescriptor {
    /// The media type of this descriptor.
    ///
    /// Layers and config may both have descriptors. Each is differentiated
    /// by its mediaType.
    pub media_type: String,
    /// The content address of the object this describes, `<algorithm>:<hex>`.
    pub digest: String,
    /// The size, in bytes, of the object this describes.
    ///
    /// Negative sizes are rejected when decoding.
    pub size: u64,
}

impl OciDescriptor {
    /// Returns the hex part of the digest, after the algorithm prefix.
    ///
    /// The digest must have exactly one `:` between an algorithm and an
    /// encoded part that both follow the OCI digest grammar.
    pub fn digest_hex(&self) -> Result<&str, PullError> {
        digest_hex(&self.digest)
    }
}

/// Splits a digest of the form `<algorithm>:<hex>` and returns the hex.
///
/// The hex becomes a file name, so anything outside the OCI digest grammar
/// (path separators, `.`) is rejected.
pub fn digest_hex(digest: &str) -> Result<&str, PullError> {
    let mut parts = digest.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(algorithm), Some(hex), None)
            if DIGEST_ALGORITHM_REGEXP.is_match(algorithm)
                && DIGEST_ENCODED_REGEXP.is_match(hex) =>
        {
            Ok(hex)
        }
        _ => Err(PullError::InvalidDigest(digest.to_owned())),
    }
}
