//! Pulling whole images to disk
//!
//! A pull resolves the reference, fetches the manifest, makes sure the image
//! directory exists and then downloads the config blob followed by every layer
//! in manifest order, one at a time. The first failure ends the pull.

use std::convert::TryFrom;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::blob::{DownloadTarget, FetchOutcome};
use crate::client::Client;
use crate::errors::PullError;
use crate::manifest::digest_hex;
use crate::progress::ProgressObserver;
use crate::Reference;

/// The file the config blob is stored in.
pub const CONFIG_FILE_NAME: &str = "config.json";

const LAYER_LABEL_LENGTH: usize = 5;

/// Where pulled images live on disk: `<root>/<host>/<name>/<tag>/`.
///
/// `<name>` is the last path segment of the repository, so `library/app` and
/// `other/app` on the same host share a directory.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    root_dir: PathBuf,
}

impl ImageLayout {
    /// Create a new `ImageLayout` rooted at `root_dir`
    pub fn new<T: AsRef<Path>>(root_dir: T) -> Self {
        Self {
            root_dir: root_dir.as_ref().into(),
        }
    }

    /// The directory an image's blobs are written to.
    pub fn image_dir(&self, r: &Reference) -> PathBuf {
        let mut path = self.root_dir.join(r.registry());
        path.push(r.name());
        path.push(r.tag());
        path
    }

    /// The path of the image's config blob.
    pub fn config_path(&self, r: &Reference) -> PathBuf {
        self.image_dir(r).join(CONFIG_FILE_NAME)
    }

    /// The path of a layer blob: the digest's hex with a `.tar` extension.
    pub fn layer_path(&self, r: &Reference, digest: &str) -> Result<PathBuf, PullError> {
        Ok(self.image_dir(r).join(format!("{}.tar", digest_hex(digest)?)))
    }

    /// Creates the image directory and any missing parents.
    pub async fn ensure(&self, r: &Reference) -> Result<PathBuf, PullError> {
        let path = self.image_dir(r);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| PullError::Layout {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

/// The result of a completed pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSummary {
    /// The directory the blobs were written to
    pub directory: PathBuf,
    /// Blobs transferred by this pull
    pub downloaded: usize,
    /// Blobs that were already complete on disk
    pub skipped: usize,
}

impl PullSummary {
    fn record(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Skipped => self.skipped += 1,
            FetchOutcome::Downloaded { .. } => self.downloaded += 1,
        }
    }
}

/// Implements the `list` and `pull` operations on top of a [`Client`].
pub struct Puller {
    client: Client,
    layout: ImageLayout,
}

impl Puller {
    /// Create a new `Puller` storing images under `images_dir`
    pub fn new<T: AsRef<Path>>(client: Client, images_dir: T) -> Self {
        Self {
            client,
            layout: ImageLayout::new(images_dir),
        }
    }

    /// Lists the tags of the reference's repository. Any tag in the reference
    /// is ignored.
    pub async fn list(&self, reference: &str) -> Result<Vec<String>, PullError> {
        let image = parse_reference(reference)?;
        self.client.list_tags(&image).await
    }

    /// Pulls the config and every layer of an image to disk.
    pub async fn pull(
        &self,
        reference: &str,
        progress: &mut dyn ProgressObserver,
    ) -> Result<PullSummary, PullError> {
        let image = parse_reference(reference)?;
        debug!(?image, "Pulling image");

        let manifest = self.client.pull_manifest(&image).await?;
        let directory = self.layout.ensure(&image).await?;
        let mut summary = PullSummary {
            directory,
            downloaded: 0,
            skipped: 0,
        };

        let config = DownloadTarget {
            url: self.blob_url(&image, &manifest.config.digest),
            destination: self.layout.config_path(&image),
            expected_size: manifest.config.size,
            label: CONFIG_FILE_NAME.to_owned(),
        };
        summary.record(self.client.fetch_blob(&config, progress).await?);

        for layer in &manifest.layers {
            let hex = layer.digest_hex()?;
            let target = DownloadTarget {
                url: self.blob_url(&image, &layer.digest),
                destination: self.layout.layer_path(&image, &layer.digest)?,
                expected_size: layer.size,
                label: short_label(hex).to_owned(),
            };
            summary.record(self.client.fetch_blob(&target, progress).await?);
        }

        info!(
            image = %image,
            directory = %summary.directory.display(),
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            "Pull complete"
        );
        Ok(summary)
    }

    fn blob_url(&self, image: &Reference, digest: &str) -> String {
        self.client
            .to_v2_blob_url(image.registry(), image.repository(), digest)
    }
}

fn parse_reference(reference: &str) -> Result<Reference, PullError> {
    Reference::try_from(reference).map_err(|source| PullError::InvalidReference {
        reference: reference.to_owned(),
        source,
    })
}

fn short_label(hex: &str) -> &str {
    match hex.char_indices().nth(LAYER_LABEL_LENGTH) {
        Some((end, _)) => &hex[..end],
        None => hex,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::progress::NoProgress;
    use crate::test_util::*;
    use crate::ParseError;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONFIG: &[u8] = b"{}";
    const LAYER_A: &[u8] = b"layer-a-bytes";
    const LAYER_B: &[u8] = b"layer-b";

    fn manifest_with(layers: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "size": CONFIG.len(),
                "digest": "sha256:c0ffee"
            },
            "layers": layers
        }))
    }

    fn two_layers() -> serde_json::Value {
        serde_json::json!([
            {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": LAYER_A.len(), "digest": "sha256:aaaaaaaa11"},
            {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": LAYER_B.len(), "digest": "sha256:bbbbbbbb22"}
        ])
    }

    async fn mount_blob(server: &MockServer, digest: &str, response: ResponseTemplate, times: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/v2/library/app/blobs/{}", digest)))
            .respond_with(response)
            .expect(times)
            .mount(server)
            .await;
    }

    async fn mount_manifest(server: &MockServer, response: ResponseTemplate, times: u64) {
        Mock::given(method("GET"))
            .and(path("/v2/library/app/manifests/v1"))
            .respond_with(response)
            .expect(times)
            .mount(server)
            .await;
    }

    fn image(server: &MockServer) -> String {
        format!("{}/library/app:v1", server.address())
    }

    #[test]
    fn layout_paths() {
        let layout = ImageLayout::new("images");
        let r = Reference::try_from("registry.example.com/library/app:v1").expect("reference");
        assert_eq!(
            layout.image_dir(&r),
            Path::new("images/registry.example.com/app/v1")
        );
        assert_eq!(
            layout.config_path(&r),
            Path::new("images/registry.example.com/app/v1/config.json")
        );
        assert_eq!(
            layout.layer_path(&r, "sha256:abc123").expect("valid digest"),
            Path::new("images/registry.example.com/app/v1/abc123.tar")
        );
        assert!(matches!(
            layout.layer_path(&r, "abc123"),
            Err(PullError::InvalidDigest(_))
        ));
        assert!(matches!(
            layout.layer_path(&r, "sha256:../../x"),
            Err(PullError::InvalidDigest(_))
        ));
    }

    #[test]
    fn short_labels() {
        assert_eq!(short_label("deadbeef"), "deadb");
        assert_eq!(short_label("abc"), "abc");
    }

    #[tokio::test]
    async fn pulls_config_and_layers_then_skips_on_rerun() {
        let server = MockServer::start().await;
        mount_manifest(&server, manifest_with(two_layers()), 2).await;
        mount_blob(&server, "sha256:c0ffee", ResponseTemplate::new(200).set_body_bytes(CONFIG), 1).await;
        mount_blob(&server, "sha256:aaaaaaaa11", ResponseTemplate::new(200).set_body_bytes(LAYER_A), 1).await;
        mount_blob(&server, "sha256:bbbbbbbb22", ResponseTemplate::new(200).set_body_bytes(LAYER_B), 1).await;
        let dir = tempfile::tempdir().expect("temp dir");
        let puller = Puller::new(http_client(), dir.path());

        let summary = puller
            .pull(&image(&server), &mut NoProgress)
            .await
            .expect("pull should not fail");

        let expected_dir = dir
            .path()
            .join(server.address().to_string())
            .join("app")
            .join("v1");
        assert_eq!(summary.directory, expected_dir);
        assert_eq!(summary.downloaded, 3);
        assert_eq!(summary.skipped, 0);
        assert_eq!(std::fs::read(expected_dir.join("config.json")).expect("config"), CONFIG);
        assert_eq!(std::fs::read(expected_dir.join("aaaaaaaa11.tar")).expect("layer a"), LAYER_A);
        assert_eq!(std::fs::read(expected_dir.join("bbbbbbbb22.tar")).expect("layer b"), LAYER_B);

        let summary = puller
            .pull(&image(&server), &mut NoProgress)
            .await
            .expect("second pull should not fail");
        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.skipped, 3);
    }

    #[tokio::test]
    async fn invalid_layer_digest_aborts_pull() {
        let server = MockServer::start().await;
        mount_manifest(
            &server,
            manifest_with(serde_json::json!([
                {"mediaType": "application/vnd.oci.image.layer.v1.tar", "size": 1, "digest": "nodigest"},
                {"mediaType": "application/vnd.oci.image.layer.v1.tar", "size": LAYER_B.len(), "digest": "sha256:bbbbbbbb22"}
            ])),
            1,
        )
        .await;
        mount_blob(&server, "sha256:c0ffee", ResponseTemplate::new(200).set_body_bytes(CONFIG), 1).await;
        mount_blob(&server, "sha256:bbbbbbbb22", ResponseTemplate::new(200).set_body_bytes(LAYER_B), 0).await;
        let dir = tempfile::tempdir().expect("temp dir");

        match Puller::new(http_client(), dir.path())
            .pull(&image(&server), &mut NoProgress)
            .await
        {
            Err(PullError::InvalidDigest(digest)) => assert_eq!(digest, "nodigest"),
            other => panic!("expected invalid digest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn layer_digest_cannot_leave_image_dir() {
        let server = MockServer::start().await;
        mount_manifest(
            &server,
            manifest_with(serde_json::json!([
                {"mediaType": "application/vnd.oci.image.layer.v1.tar", "size": 1, "digest": "sha256:../../../escaped"}
            ])),
            1,
        )
        .await;
        mount_blob(&server, "sha256:c0ffee", ResponseTemplate::new(200).set_body_bytes(CONFIG), 1).await;
        let dir = tempfile::tempdir().expect("temp dir");
        let images = dir.path().join("images");

        match Puller::new(http_client(), &images)
            .pull(&image(&server), &mut NoProgress)
            .await
        {
            Err(PullError::InvalidDigest(digest)) => assert_eq!(digest, "sha256:../../../escaped"),
            other => panic!("expected invalid digest, got {:?}", other),
        }
        assert!(!images.join("escaped.tar").exists());
        assert!(!dir.path().join("escaped.tar").exists());
    }

    #[tokio::test]
    async fn first_failed_layer_aborts_pull() {
        let server = MockServer::start().await;
        mount_manifest(&server, manifest_with(two_layers()), 1).await;
        mount_blob(&server, "sha256:c0ffee", ResponseTemplate::new(200).set_body_bytes(CONFIG), 1).await;
        mount_blob(&server, "sha256:aaaaaaaa11", ResponseTemplate::new(500), 1).await;
        mount_blob(&server, "sha256:bbbbbbbb22", ResponseTemplate::new(200).set_body_bytes(LAYER_B), 0).await;
        let dir = tempfile::tempdir().expect("temp dir");

        assert!(matches!(
            Puller::new(http_client(), dir.path())
                .pull(&image(&server), &mut NoProgress)
                .await,
            Err(PullError::Registry { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn manifest_failure_creates_nothing() {
        let server = MockServer::start().await;
        mount_manifest(&server, ResponseTemplate::new(404), 1).await;
        let dir = tempfile::tempdir().expect("temp dir");

        let result = Puller::new(http_client(), dir.path())
            .pull(&image(&server), &mut NoProgress)
            .await;

        assert!(matches!(result, Err(PullError::Registry { status: 404, .. })));
        assert!(!dir.path().join(server.address().to_string()).exists());
    }

    #[tokio::test]
    async fn invalid_reference_makes_no_request() {
        let dir = tempfile::tempdir().expect("temp dir");
        let puller = Puller::new(http_client(), dir.path());

        match puller.pull("no-slash-here", &mut NoProgress).await {
            Err(PullError::InvalidReference { source, .. }) => {
                assert_eq!(source, ParseError::MissingRegistry)
            }
            other => panic!("expected invalid reference, got {:?}", other),
        }
        assert!(matches!(
            puller.list("no-slash-here").await,
            Err(PullError::InvalidReference { .. })
        ));
    }

    #[tokio::test]
    async fn tag_cannot_leave_image_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        let images = dir.path().join("images");

        match Puller::new(http_client(), &images)
            .pull("127.0.0.1:1/app:../../x", &mut NoProgress)
            .await
        {
            Err(PullError::InvalidReference { source, .. }) => {
                assert_eq!(source, ParseError::UnsafePathSegment("../../x".to_owned()))
            }
            other => panic!("expected invalid reference, got {:?}", other),
        }
        assert!(!images.exists());
    }

    #[tokio::test]
    async fn list_ignores_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/library/app/tags/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"name": "library/app", "tags": ["v1"]})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().expect("temp dir");

        let tags = Puller::new(http_client(), dir.path())
            .list(&image(&server))
            .await
            .expect("list should not fail");
        assert_eq!(tags, vec!["v1"]);
    }
}
