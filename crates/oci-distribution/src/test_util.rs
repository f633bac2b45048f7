//! Fake registry helpers shared by the unit tests

use std::convert::TryFrom;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::client::{Client, ClientConfig, ClientProtocol};
use crate::Reference;

pub(crate) const TOKEN: &str = "test-token";

pub(crate) fn http_client() -> Client {
    Client::new(ClientConfig {
        protocol: ClientProtocol::Http,
        ..Default::default()
    })
}

/// A reference to `repo_tag` on the fake registry, e.g. `library/app:v1`.
pub(crate) fn reference(server: &MockServer, repo_tag: &str) -> Reference {
    Reference::try_from(format!("{}/{}", server.address(), repo_tag))
        .expect("could not parse reference")
}

pub(crate) fn challenge(server: &MockServer) -> String {
    format!(
        r#"Bearer realm="{}/token",service="test-registry",scope="repository:library/app:pull""#,
        server.uri()
    )
}

pub(crate) fn unauthorized(server: &MockServer) -> ResponseTemplate {
    ResponseTemplate::new(401)
        .insert_header("WWW-Authenticate", challenge(server).as_str())
        .set_body_string(
            r#"{"errors":[{"code":"UNAUTHORIZED","message":"authentication required"}]}"#,
        )
}

/// Serves `TOKEN` from `/token`, expecting exactly `times` exchanges.
pub(crate) async fn mount_token(server: &MockServer, times: u64) {
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": TOKEN })))
        .expect(times)
        .mount(server)
        .await;
}

/// Serves `response` at `url_path` only to requests carrying `TOKEN`, and a
/// bearer challenge to everything else.
pub(crate) async fn mount_protected(
    server: &MockServer,
    url_path: &str,
    response: ResponseTemplate,
    times: u64,
) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .and(header("Authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(response)
        .with_priority(1)
        .expect(times)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(unauthorized(server))
        .expect(times)
        .mount(server)
        .await;
}
