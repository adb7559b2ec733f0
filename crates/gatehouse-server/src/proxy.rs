//! Reverse proxy for non-tunnel HTTP requests.
//!
//! Every forwarded request goes to the configured backend origin. The
//! inbound scheme, host and `Host` header are ignored; method, path, query,
//! body and end-to-end headers are passed through.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use gatehouse_core::{GateError, GateResult};
use reqwest::Url;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Largest request body buffered for forwarding (16 MiB).
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub struct ReverseProxy {
    scheme: String,
    /// `host[:port]` of the backend.
    authority: String,
    client: reqwest::Client,
}

impl ReverseProxy {
    /// Parse the backend URL. It must carry a scheme and a non-empty host.
    pub fn new(target: &str) -> GateResult<Self> {
        let url = Url::parse(target)
            .map_err(|e| GateError::Config(format!("invalid proxy URL ({target}): {e}")))?;
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => {
                return Err(GateError::Config(format!(
                    "missing protocol or host in proxy URL ({target})"
                )))
            }
        };
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GateError::Config(format!("failed to build proxy client: {e}")))?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            authority,
            client,
        })
    }

    /// Backend `host[:port]`.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Rewrite `uri` onto the backend origin, keeping path and query
    /// byte for byte. A request whose path would be altered by URL
    /// normalisation (dot segments, re-encoding) is refused rather than
    /// sent to a different resource.
    pub fn rewrite(&self, uri: &Uri) -> GateResult<Url> {
        let (path, query) = match uri.path_and_query() {
            Some(pq) => (pq.path(), pq.query()),
            None => ("/", None),
        };
        let target = match query {
            Some(query) => format!("{}://{}{}?{}", self.scheme, self.authority, path, query),
            None => format!("{}://{}{}", self.scheme, self.authority, path),
        };
        let url = Url::parse(&target)
            .map_err(|e| GateError::InvalidMessage(format!("bad request URI: {e}")))?;
        if url.path() != path || url.query() != query {
            return Err(GateError::InvalidMessage(format!(
                "request path {path} does not survive forwarding unchanged"
            )));
        }
        Ok(url)
    }

    /// Forward `req` to the backend and stream the answer back.
    pub async fn forward(&self, req: Request, remote: Option<SocketAddr>) -> Response {
        let (parts, body) = req.into_parts();

        let url = match self.rewrite(&parts.uri) {
            Ok(url) => url,
            Err(e) => {
                debug!(error = %e, "rejecting unroutable request");
                return (StatusCode::BAD_REQUEST, "Bad request").into_response();
            }
        };

        let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "request body rejected");
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        };

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        // reqwest sets Host from the rewritten URL.
        headers.remove(header::HOST);
        if let Some(remote) = remote {
            append_forwarded_for(&mut headers, remote);
        }

        debug!(method = %parts.method, url = %url, "proxying request");
        let upstream = match self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(backend = %self.authority, error = %e, "proxy request failed");
                return (StatusCode::BAD_GATEWAY, "Bad gateway").into_response();
            }
        };

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

fn append_forwarded_for(headers: &mut HeaderMap, remote: SocketAddr) {
    let ip = remote.ip().to_string();
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn rejects_url_without_host() {
        for bad in ["backend.example", "backend:8080", "http://", "/just/a/path", "::"] {
            let err = ReverseProxy::new(bad).err().unwrap();
            assert!(matches!(err, GateError::Config(_)), "{bad} should fail");
        }
    }

    #[test]
    fn keeps_explicit_port() {
        let proxy = ReverseProxy::new("https://backend.example:8443").unwrap();
        assert_eq!(proxy.authority(), "backend.example:8443");

        let proxy = ReverseProxy::new("https://backend.example").unwrap();
        assert_eq!(proxy.authority(), "backend.example");
    }

    #[test]
    fn rewrite_enforces_origin_and_keeps_path() {
        let proxy = ReverseProxy::new("https://backend.example:8443").unwrap();

        let uri: Uri = "http://evil.example:9999/a/b?x=1&y=2".parse().unwrap();
        let url = proxy.rewrite(&uri).unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("backend.example"));
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.path(), "/a/b");
        assert_eq!(url.query(), Some("x=1&y=2"));

        let uri: Uri = "/plain".parse().unwrap();
        assert_eq!(
            proxy.rewrite(&uri).unwrap().as_str(),
            "https://backend.example:8443/plain"
        );
    }

    #[test]
    fn rewrite_refuses_paths_that_would_change() {
        let proxy = ReverseProxy::new("https://backend.example:8443").unwrap();
        for raw in ["/static/../admin", "/x/%2e%2e/y", "/a/./b", "/a/%2E/b"] {
            let uri: Uri = raw.parse().unwrap();
            let err = proxy.rewrite(&uri).err().unwrap();
            assert!(matches!(err, GateError::InvalidMessage(_)), "{raw} should be refused");
        }

        let uri: Uri = "/files/a%20b/..c?q=%2e%2e".parse().unwrap();
        let url = proxy.rewrite(&uri).unwrap();
        assert_eq!(url.path(), "/files/a%20b/..c");
        assert_eq!(url.query(), Some("q=%2e%2e"));
    }

    #[tokio::test]
    async fn dot_segment_request_is_not_forwarded() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&backend)
            .await;

        let proxy = ReverseProxy::new(&backend.uri()).unwrap();
        for raw in ["/static/../admin", "/x/%2e%2e/y"] {
            let req = Request::builder().uri(raw).body(Body::empty()).unwrap();
            let resp = proxy.forward(req, None).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{raw}");
        }
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/plain"));
        strip_hop_by_hop(&mut headers);
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get(header::ACCEPT).is_some());
    }

    #[tokio::test]
    async fn forwards_to_backend_regardless_of_host_header() {
        let backend = MockServer::start().await;
        let backend_authority = backend.uri().trim_start_matches("http://").to_string();
        Mock::given(method("POST"))
            .and(path("/api/items"))
            .and(query_param("x", "1"))
            .and(header_is("host", backend_authority.as_str()))
            .and(header_is("x-forwarded-for", "10.1.2.3"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&backend)
            .await;

        let proxy = ReverseProxy::new(&backend.uri()).unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("http://evil.example/api/items?x=1")
            .header(header::HOST, "evil.example")
            .body(Body::from("payload"))
            .unwrap();

        let resp = proxy.forward(req, Some("10.1.2.3:5555".parse().unwrap())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"created");
    }

    #[tokio::test]
    async fn unreachable_backend_is_bad_gateway() {
        let proxy = ReverseProxy::new("http://127.0.0.1:1").unwrap();
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = proxy.forward(req, None).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
