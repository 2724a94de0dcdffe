//! HTTP transport for the signing authority.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::info;
use trustsign_core::Settings;

use crate::GatewayError;
use crate::gateway::SigningTransport;
use crate::remote::{AccessToken, RemoteStatus, SubmitBatch};

const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
const DEFAULT_SCOPE: &str = "https://codesigning.azure.net/.default";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    request_id: String,
    files: Vec<SubmitFile<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitFile<'a> {
    name: &'a str,
    size_bytes: u64,
    content: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

/// reqwest-backed [`SigningTransport`].
pub struct HttpTransport {
    client: reqwest::Client,
    authority: Url,
    endpoint: Url,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    profile: String,
    scope: String,
}

impl HttpTransport {
    /// Build a transport from configured settings.
    ///
    /// Fails with [`GatewayError::NotConfigured`] if any identity field is
    /// missing, and [`GatewayError::InvalidUrl`] if the endpoint or authority
    /// is not an absolute http(s) URL.
    pub fn new(settings: &Settings) -> Result<Self, GatewayError> {
        if !settings.is_configured() {
            return Err(GatewayError::NotConfigured(settings.missing_fields()));
        }
        let field = |v: &Option<String>| v.as_deref().unwrap_or_default().trim().to_string();
        let scope = settings
            .token_scope
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SCOPE)
            .to_string();
        Ok(Self {
            client: reqwest::Client::new(),
            authority: parse_base(
                settings
                    .authority_host
                    .as_deref()
                    .unwrap_or(DEFAULT_AUTHORITY),
            )?,
            endpoint: parse_base(&field(&settings.endpoint))?,
            tenant_id: field(&settings.tenant_id),
            client_id: field(&settings.client_id),
            client_secret: field(&settings.client_secret),
            profile: field(&settings.certificate_profile),
            scope,
        })
    }

    fn token_url(&self) -> Url {
        join(&self.authority, &[self.tenant_id.as_str(), "oauth2", "v2.0", "token"])
    }

    fn submit_url(&self) -> Url {
        join(
            &self.endpoint,
            &["certificateprofiles", self.profile.as_str(), "signing-requests"],
        )
    }

    fn request_url(&self, remote_id: &str, tail: &[&str]) -> Url {
        let mut segments = vec!["signing-requests", remote_id];
        segments.extend_from_slice(tail);
        join(&self.endpoint, &segments)
    }
}

fn parse_base(raw: &str) -> Result<Url, GatewayError> {
    let raw = raw.trim();
    let invalid = |reason: String| GatewayError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(invalid("expected an absolute http(s) URL".into()));
    }
    Ok(url)
}

/// Append percent-encoded path segments to `base`.
fn join(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    // `parse_base` only admits URLs that can be a base, so this always succeeds.
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Map a non-success response to an error, reading the body for context.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(GatewayError::Unauthorized {
            status: status.as_u16(),
        });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GatewayError::Server {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl SigningTransport for HttpTransport {
    async fn request_token(&self) -> Result<AccessToken, GatewayError> {
        let url = self.token_url();
        info!(url = %url, "requesting access token");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let resp = check(self.client.post(url).form(&form).send().await?).await?;
        let token: TokenResponse = serde_json::from_slice(&resp.bytes().await?)?;
        let expires_at = Utc::now() + chrono::Duration::seconds(token.expires_in);
        Ok(AccessToken::new(token.access_token, expires_at))
    }

    async fn submit(&self, token: &str, batch: &SubmitBatch) -> Result<String, GatewayError> {
        let mut files = Vec::with_capacity(batch.files.len());
        for file in &batch.files {
            let bytes = tokio::fs::read(&file.path)
                .await
                .map_err(|source| GatewayError::Io {
                    path: file.path.clone(),
                    source,
                })?;
            files.push(SubmitFile {
                name: &file.name,
                size_bytes: bytes.len() as u64,
                content: BASE64.encode(&bytes),
            });
        }
        let body = SubmitBody {
            request_id: batch.request_id.to_string(),
            files,
        };

        let url = self.submit_url();
        info!(url = %url, count = batch.files.len(), "submitting signing request");
        let resp = check(
            self.client
                .post(url)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await?,
        )
        .await?;
        let result: SubmitResponse = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(result.id)
    }

    async fn status(&self, token: &str, remote_id: &str) -> Result<RemoteStatus, GatewayError> {
        let url = self.request_url(remote_id, &[]);
        let resp = check(self.client.get(url).bearer_auth(token).send().await?).await?;
        let result: StatusResponse = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(RemoteStatus::parse(&result.status))
    }

    async fn download(
        &self,
        token: &str,
        remote_id: &str,
        file_name: &str,
    ) -> Result<Option<Vec<u8>>, GatewayError> {
        let url = self.request_url(remote_id, &["files", file_name]);
        let resp = self.client.get(url).bearer_auth(token).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check(resp).await?;
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn cancel(&self, token: &str, remote_id: &str) -> Result<(), GatewayError> {
        let url = self.request_url(remote_id, &["cancel"]);
        info!(url = %url, "cancelling signing request");
        check(self.client.post(url).bearer_auth(token).send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Settings {
        Settings {
            tenant_id: Some(" tenant ".into()),
            client_id: Some("client".into()),
            client_secret: Some("secret".into()),
            endpoint: Some("https://eus.codesigning.example/".into()),
            certificate_profile: Some("release".into()),
            ..Settings::default()
        }
    }

    #[test]
    fn new_rejects_incomplete_settings() {
        let err = HttpTransport::new(&Settings::default()).err().unwrap();
        assert!(matches!(err, GatewayError::NotConfigured(ref f) if f.len() == 5));
    }

    #[test]
    fn endpoint_trailing_slash_and_whitespace_trimmed() {
        let t = HttpTransport::new(&configured()).unwrap();
        assert_eq!(t.tenant_id, "tenant");
        assert_eq!(
            t.request_url("abc", &[]).as_str(),
            "https://eus.codesigning.example/signing-requests/abc"
        );
        assert_eq!(
            t.token_url().as_str(),
            "https://login.microsoftonline.com/tenant/oauth2/v2.0/token"
        );
        assert_eq!(
            t.submit_url().as_str(),
            "https://eus.codesigning.example/certificateprofiles/release/signing-requests"
        );
    }

    #[test]
    fn authority_override_used() {
        let mut s = configured();
        s.authority_host = Some("http://localhost:9000/".into());
        let t = HttpTransport::new(&s).unwrap();
        assert_eq!(
            t.token_url().as_str(),
            "http://localhost:9000/tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn endpoint_base_path_is_kept() {
        let mut s = configured();
        s.endpoint = Some("https://gateway.example/codesign/".into());
        let t = HttpTransport::new(&s).unwrap();
        assert_eq!(
            t.request_url("r1", &["cancel"]).as_str(),
            "https://gateway.example/codesign/signing-requests/r1/cancel"
        );
    }

    #[test]
    fn reserved_characters_in_segments_are_encoded() {
        let t = HttpTransport::new(&configured()).unwrap();
        let url = t.request_url("r1", &["files", "setup#2.exe"]);
        assert_eq!(url.path(), "/signing-requests/r1/files/setup%232.exe");
        assert!(url.fragment().is_none());

        let url = t.request_url("r1", &["files", "a?b%c/d.exe"]);
        assert_eq!(url.path(), "/signing-requests/r1/files/a%3Fb%25c%2Fd.exe");
        assert!(url.query().is_none());
    }

    #[test]
    fn non_http_endpoint_rejected() {
        let mut s = configured();
        s.endpoint = Some("signing.example".into());
        let err = HttpTransport::new(&s).err().unwrap();
        assert!(matches!(err, GatewayError::InvalidUrl { .. }));
        assert_eq!(err.kind(), trustsign_core::ErrorKind::Configuration);
    }

    #[test]
    fn token_scope_defaults_and_overrides() {
        let t = HttpTransport::new(&configured()).unwrap();
        assert_eq!(t.scope, DEFAULT_SCOPE);

        let mut s = configured();
        s.token_scope = Some(" api://signing/.default ".into());
        let t = HttpTransport::new(&s).unwrap();
        assert_eq!(t.scope, "api://signing/.default");
    }

    // ── Local listener ──

    /// Accept one connection, answer with `response`, return the request line.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&request)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string()
        });
        (base, handle)
    }

    fn local_transport(base: &str) -> HttpTransport {
        let mut s = configured();
        s.endpoint = Some(base.to_string());
        let mut t = HttpTransport::new(&s).unwrap();
        t.client = reqwest::Client::builder().no_proxy().build().unwrap();
        t
    }

    #[tokio::test]
    async fn download_404_is_absent_and_name_is_encoded() {
        let (base, server) =
            serve_once("HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        let t = local_transport(&base);

        let result = t.download("tok", "r1", "setup#2.exe").await.unwrap();
        assert!(result.is_none());
        assert_eq!(
            server.await.unwrap(),
            "GET /signing-requests/r1/files/setup%232.exe HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn download_returns_signed_bytes() {
        let (base, server) =
            serve_once("HTTP/1.1 200 OK\r\ncontent-length: 6\r\nconnection: close\r\n\r\nsigned")
                .await;
        let t = local_transport(&base);

        let result = t.download("tok", "r1", "a.exe").await.unwrap();
        assert_eq!(result.as_deref(), Some(&b"signed"[..]));
        assert_eq!(
            server.await.unwrap(),
            "GET /signing-requests/r1/files/a.exe HTTP/1.1"
        );
    }

    #[test]
    fn submit_body_serialises_camel_case() {
        let body = SubmitBody {
            request_id: "r-1".into(),
            files: vec![SubmitFile {
                name: "a.exe",
                size_bytes: 3,
                content: BASE64.encode(b"abc"),
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["requestId"], "r-1");
        assert_eq!(json["files"][0]["sizeBytes"], 3);
        assert_eq!(json["files"][0]["content"], "YWJj");
    }

    #[test]
    fn token_response_parses() {
        let body = r#"{"access_token":"abc","expires_in":3599,"token_type":"Bearer"}"#;
        let t: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(t.access_token, "abc");
        assert_eq!(t.expires_in, 3599);
    }
}
