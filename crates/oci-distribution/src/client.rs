//! OCI distribution client
//!
//! The [`Client`] speaks the read side of the registry HTTP API: manifests,
//! tag listings and blobs. Registry authentication is treated as a one-shot
//! challenge. A request is first sent anonymously. If the registry answers 401,
//! its challenge is exchanged for a token and the same request is sent exactly
//! once more with that token. Tokens are never cached between requests.

use std::convert::TryFrom;
use std::time::Duration;

use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::auth::{BearerChallenge, BearerToken};
use crate::errors::{OciEnvelope, PullError};
use crate::manifest::{OciManifest, MIME_TYPES_DISTRIBUTION_MANIFEST};
use crate::Reference;

/// The OCI client connects to an OCI registry and fetches image manifests,
/// tag listings and blobs.
///
/// An OCI registry is a container registry that adheres to the OCI Distribution
/// specification. DockerHub is one example, as are ACR and GCR.
///
/// Some registries allow anonymous pulls; most answer with a bearer challenge
/// that the client resolves on demand, per request.
#[derive(Default)]
pub struct Client {
    config: ClientConfig,
    client: reqwest::Client,
}

/// A source that can provide a `ClientConfig`.
/// If you are using this crate in your own application, you can implement this
/// trait on your configuration type so that it can be passed to `Client::from_source`.
pub trait ClientConfigSource {
    /// Provides a `ClientConfig`.
    fn client_config(&self) -> ClientConfig;
}

impl TryFrom<ClientConfig> for Client {
    type Error = reqwest::Error;

    fn try_from(config: ClientConfig) -> Result<Self, Self::Error> {
        let mut client_builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certificates);

        client_builder = match () {
            #[cfg(feature = "native-tls")]
            () => client_builder.danger_accept_invalid_hostnames(config.accept_invalid_hostnames),
            #[cfg(not(feature = "native-tls"))]
            () => {
                if config.accept_invalid_hostnames {
                    warn!("Cannot change value of `accept_invalid_hostnames`: missing 'native-tls' feature");
                }
                client_builder
            }
        };

        if let Some(timeout) = config.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        Ok(Self {
            client: client_builder.build()?,
            config,
        })
    }
}

impl Client {
    /// Create a new client with the supplied config
    pub fn new(config: ClientConfig) -> Self {
        Client::try_from(config.clone()).unwrap_or_else(|err| {
            warn!("Cannot create OCI client from config: {:?}", err);
            warn!("Creating client with default configuration");
            Self {
                config,
                client: reqwest::Client::new(),
            }
        })
    }

    /// Create a new client with the supplied config
    pub fn from_source(config_source: &impl ClientConfigSource) -> Self {
        Self::new(config_source.client_config())
    }

    /// Issues a single GET, attaching the token when one is given and an
    /// `Accept` header when `accept` lists any media types.
    ///
    /// The response is returned whatever its status; no challenge handling
    /// happens here.
    pub async fn request(
        &self,
        url: &str,
        token: Option<&BearerToken>,
        accept: &[&str],
    ) -> Result<Response, PullError> {
        debug!(%url, authenticated = token.is_some(), "GET");
        let res = RequestBuilderWrapper::from_client(self, |client| client.get(url))
            .apply_accept(accept)
            .apply_auth(token)
            .into_request_builder()
            .send()
            .await
            .map_err(|source| PullError::Transport {
                url: url.to_owned(),
                source,
            })?;
        trace!(status = %res.status(), headers = ?res.headers(), "Got Headers");
        Ok(res)
    }

    /// Issues a GET that follows the challenge-response protocol.
    ///
    /// The request is first sent without a token. On a 401 the
    /// `WWW-Authenticate` challenge is resolved into a token and the request is
    /// sent once more with it. Any non-success status after that, including a
    /// second 401, is returned as [`PullError::Registry`].
    pub async fn authenticated_request(
        &self,
        url: &str,
        accept: &[&str],
    ) -> Result<Response, PullError> {
        let res = self.request(url, None, accept).await?;
        if res.status() != StatusCode::UNAUTHORIZED {
            return check_status(url, res).await;
        }

        let challenge = res
            .headers()
            .get(WWW_AUTHENTICATE)
            .ok_or_else(|| {
                PullError::AuthChallenge(format!("401 from {} without a WWW-Authenticate header", url))
            })?
            .to_str()
            .map_err(|e| PullError::AuthChallenge(format!("unreadable WWW-Authenticate header: {}", e)))?
            .to_owned();
        debug!(%url, "Registry requested authentication");

        let token = self.resolve_challenge(&challenge).await?;
        let res = self.request(url, Some(&token), accept).await?;
        check_status(url, res).await
    }

    /// Turns a `WWW-Authenticate` challenge into a bearer token.
    ///
    /// The challenge is validated before any request is made; an incomplete one
    /// fails with [`PullError::AuthChallenge`].
    pub async fn resolve_challenge(&self, header: &str) -> Result<BearerToken, PullError> {
        BearerChallenge::parse(header)?
            .exchange(&self.client)
            .await
    }

    /// Pull a manifest from the remote OCI Distribution service.
    ///
    /// Authenticates on demand. A body that is not a manifest fails with
    /// [`PullError::Decode`].
    pub async fn pull_manifest(&self, image: &Reference) -> Result<OciManifest, PullError> {
        let url = self.to_v2_manifest_url(image);
        debug!("Pulling image manifest from {}", url);

        let res = self
            .authenticated_request(&url, MIME_TYPES_DISTRIBUTION_MANIFEST)
            .await?;
        let text = read_text(&url, res).await?;
        debug!("Parsing response as OciManifest: {}", text);
        serde_json::from_str(&text).map_err(|source| PullError::Decode {
            what: format!("manifest for {}", image),
            source,
        })
    }

    /// Lists the tags of the image's repository.
    ///
    /// Only anonymous listings are supported: a 401 is returned as
    /// [`PullError::Registry`] without attempting the challenge.
    pub async fn list_tags(&self, image: &Reference) -> Result<Vec<String>, PullError> {
        let url = self.to_v2_tags_url(image);
        debug!("Listing tags from {}", url);

        let res = check_status(&url, self.request(&url, None, &[]).await?).await?;
        let text = read_text(&url, res).await?;
        let list: TagList = serde_json::from_str(&text).map_err(|source| PullError::Decode {
            what: format!("tag list for {}", image.repository()),
            source,
        })?;
        Ok(list.tags.unwrap_or_default())
    }

    /// Convert a Reference to a v2 manifest URL.
    pub(crate) fn to_v2_manifest_url(&self, reference: &Reference) -> String {
        format!(
            "{}://{}/v2/{}/manifests/{}",
            self.config.protocol.scheme_for(reference.registry()),
            reference.registry(),
            reference.repository(),
            reference.tag()
        )
    }

    /// Convert a Reference to a v2 tag listing URL.
    pub(crate) fn to_v2_tags_url(&self, reference: &Reference) -> String {
        format!(
            "{}://{}/v2/{}/tags/list",
            self.config.protocol.scheme_for(reference.registry()),
            reference.registry(),
            reference.repository(),
        )
    }

    /// Convert a registry, repository and digest to a v2 blob URL.
    pub(crate) fn to_v2_blob_url(&self, registry: &str, repository: &str, digest: &str) -> String {
        format!(
            "{}://{}/v2/{}/blobs/{}",
            self.config.protocol.scheme_for(registry),
            registry,
            repository,
            digest,
        )
    }
}

#[derive(Deserialize)]
struct TagList {
    // Some registries send `null` for a repository without tags.
    tags: Option<Vec<String>>,
}

/// Passes success responses through and turns everything else into
/// [`PullError::Registry`], keeping the OCI error message if the body has one.
async fn check_status(url: &str, res: Response) -> Result<Response, PullError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    debug!(%url, %status, "Registry request failed");
    Err(PullError::Registry {
        status: status.as_u16(),
        url: url.to_owned(),
        message: OciEnvelope::first_message(&body),
    })
}

async fn read_text(url: &str, res: Response) -> Result<String, PullError> {
    res.text().await.map_err(|source| PullError::Transport {
        url: url.to_owned(),
        source,
    })
}

/// The request builder wrapper allows to be instantiated from a
/// `Client` and allows composable operations on the request builder,
/// to produce a `RequestBuilder` object that can be executed.
struct RequestBuilderWrapper {
    request_builder: RequestBuilder,
}

// RequestBuilderWrapper type management
impl RequestBuilderWrapper {
    /// Create a `RequestBuilderWrapper` from a `Client` instance, by
    /// instantiating the internal `RequestBuilder` with the provided
    /// function `f`.
    fn from_client(
        client: &Client,
        f: impl Fn(&reqwest::Client) -> RequestBuilder,
    ) -> RequestBuilderWrapper {
        RequestBuilderWrapper {
            request_builder: f(&client.client),
        }
    }

    // Produces a final `RequestBuilder` out of this `RequestBuilderWrapper`
    fn into_request_builder(self) -> RequestBuilder {
        self.request_builder
    }
}

// Composable functions applicable to a `RequestBuilderWrapper`
impl RequestBuilderWrapper {
    fn apply_accept(self, accept: &[&str]) -> RequestBuilderWrapper {
        if accept.is_empty() {
            return self;
        }
        RequestBuilderWrapper {
            request_builder: self
                .request_builder
                .header(reqwest::header::ACCEPT, accept.join(", ")),
        }
    }

    /// Inserts the bearer token in an Authorization header, if there is one.
    fn apply_auth(self, token: Option<&BearerToken>) -> RequestBuilderWrapper {
        match token {
            Some(token) => {
                debug!("Using bearer token authentication.");
                RequestBuilderWrapper {
                    request_builder: self
                        .request_builder
                        .header(reqwest::header::AUTHORIZATION, token.header_value()),
                }
            }
            None => self,
        }
    }
}

/// A client configuration
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Which protocol the client should use
    pub protocol: ClientProtocol,

    /// Accept invalid hostname. Defaults to false
    pub accept_invalid_hostnames: bool,

    /// Accept invalid certificates. Defaults to false
    pub accept_invalid_certificates: bool,

    /// Upper bound for each request, from connect to the end of the body.
    ///
    /// Defaults to `None`: a peer that stops responding hangs the operation.
    pub timeout: Option<Duration>,
}

/// The protocol that the client should use to connect
#[derive(Debug, Clone, PartialEq)]
pub enum ClientProtocol {
    #[allow(missing_docs)]
    Http,
    #[allow(missing_docs)]
    Https,
    /// HTTPS for every registry except the listed hosts
    HttpsExcept(Vec<String>),
}

impl Default for ClientProtocol {
    fn default() -> Self {
        ClientProtocol::Https
    }
}

impl ClientProtocol {
    fn scheme_for(&self, registry: &str) -> &str {
        match self {
            ClientProtocol::Https => "https",
            ClientProtocol::Http => "http",
            ClientProtocol::HttpsExcept(exceptions) => {
                if exceptions.iter().any(|e| e == registry) {
                    "http"
                } else {
                    "https"
                }
            }
        }
    }
}
