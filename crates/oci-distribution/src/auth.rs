//! Bearer challenge parsing and token exchange
//!
//! A registry that requires authentication answers an anonymous request with
//! `401 Unauthorized` and a `WWW-Authenticate: Bearer realm="…",service="…",scope="…"`
//! header. The realm is a token endpoint: a GET to it with the scope and service
//! as query parameters yields a short-lived token, which is then sent as
//! `Authorization: Bearer <token>` when the original request is reissued.

use hyperx::header::Header;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;
use www_authenticate::{Challenge, ChallengeFields, RawChallenge, WwwAuthenticate};

use crate::errors::PullError;

/// A complete bearer challenge: every field needed to ask for a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BearerChallenge {
    /// The token endpoint
    pub realm: String,
    /// The service the token is for
    pub service: String,
    /// The access being requested, e.g. `repository:library/app:pull`
    pub scope: String,
}

impl BearerChallenge {
    /// Parses a `WWW-Authenticate` header value.
    ///
    /// Fails if the header holds no bearer challenge or if any of `realm`,
    /// `service` or `scope` is missing or empty. No request is made.
    pub fn parse(header: &str) -> Result<Self, PullError> {
        let auth = WwwAuthenticate::parse_header(&header.as_bytes().into())
            .map_err(|e| PullError::AuthChallenge(format!("{}: {:?}", e, header)))?;
        let params = auth
            .get::<BearerParams>()
            .and_then(|challenges| challenges.into_iter().next())
            .ok_or_else(|| PullError::AuthChallenge(format!("no Bearer challenge in {:?}", header)))?;

        Ok(BearerChallenge {
            realm: required("realm", params.realm, header)?,
            service: required("service", params.service, header)?,
            scope: required("scope", params.scope, header)?,
        })
    }

    /// Builds the token endpoint URL: the realm with `scope` and `service`
    /// appended to whatever query it already has.
    pub fn token_url(&self) -> Result<Url, PullError> {
        let mut url = Url::parse(&self.realm).map_err(|e| PullError::AuthExchange {
            realm: self.realm.clone(),
            reason: format!("realm is not a valid URL: {}", e),
        })?;
        url.query_pairs_mut()
            .append_pair("scope", &self.scope)
            .append_pair("service", &self.service);
        Ok(url)
    }

    /// Exchanges this challenge for a token with an unauthenticated GET to the
    /// realm.
    ///
    /// Network failures, non-success statuses and undecodable bodies are all
    /// reported as [`PullError::AuthExchange`]. The exchange is never retried.
    pub async fn exchange(&self, client: &reqwest::Client) -> Result<BearerToken, PullError> {
        let url = self.token_url()?;
        debug!(realm = %self.realm, service = %self.service, scope = %self.scope, "Requesting bearer token");

        let failed = |reason: String| PullError::AuthExchange {
            realm: self.realm.clone(),
            reason,
        };

        let res = client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            return Err(failed(format!("token endpoint returned status {}", status)));
        }
        let text = res.text().await.map_err(|e| failed(e.to_string()))?;
        let token: RegistryToken = serde_json::from_str(&text)
            .map_err(|e| failed(format!("malformed token response: {}", e)))?;
        if token.token().is_empty() {
            return Err(failed("token endpoint returned an empty token".to_owned()));
        }

        debug!("Received bearer token");
        Ok(BearerToken(token.token().to_owned()))
    }
}

fn required(field: &str, value: Option<String>, header: &str) -> Result<String, PullError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PullError::AuthChallenge(format!(
            "missing {} in {:?}",
            field, header
        ))),
    }
}

/// An opaque access token, valid for a single request and its retry.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wraps a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        BearerToken(token.into())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The value of the `Authorization` header carrying this token.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

/// A token granted by the realm. Registries use either field name.
#[derive(Deserialize, Clone)]
#[serde(untagged)]
#[serde(rename_all = "snake_case")]
enum RegistryToken {
    Token { token: String },
    AccessToken { access_token: String },
}

impl RegistryToken {
    fn token(&self) -> &str {
        match self {
            RegistryToken::Token { token } => token,
            RegistryToken::AccessToken { access_token } => access_token,
        }
    }
}

#[derive(Clone)]
struct BearerParams {
    realm: Option<String>,
    service: Option<String>,
    scope: Option<String>,
}

impl Challenge for BearerParams {
    fn challenge_name() -> &'static str {
        "Bearer"
    }

    fn from_raw(raw: RawChallenge) -> Option<Self> {
        match raw {
            RawChallenge::Token68(_) => None,
            RawChallenge::Fields(mut map) => Some(BearerParams {
                realm: map.remove("realm"),
                scope: map.remove("scope"),
                service: map.remove("service"),
            }),
        }
    }

    fn into_raw(self) -> RawChallenge {
        let mut map = ChallengeFields::new();
        if let Some(realm) = self.realm {
            map.insert_static_quoting("realm", realm);
        }
        if let Some(scope) = self.scope {
            map.insert_static_quoting("scope", scope);
        }
        if let Some(service) = self.service {
            map.insert_static_quoting("service", service);
        }
        RawChallenge::Fields(map)
    }
}
