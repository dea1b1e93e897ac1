//! A minimal reverse proxy that puts the pageview feeder in front of an upstream
//! HTTP service.
use std::time;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::{header, HeaderMap, StatusCode};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::ProxyError;
use crate::feeder::PageviewFeeder;
use crate::layer::PageviewLayer;

/// Requests with a larger body are answered with an error instead of forwarded.
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

const HOP_BY_HOP_HEADERS: &[header::HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Clone, Debug)]
pub struct Upstream {
    client: reqwest::Client,
    base: String,
}

impl Upstream {
    pub fn new(url: &str, timeout: time::Duration) -> Result<Self, ProxyError> {
        let base = reqwest::Url::parse(url).map_err(|e| ProxyError::InvalidUpstreamUrl {
            url: url.to_owned(),
            source: e,
        })?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ProxyError::HttpClient)?;

        Ok(Self {
            client,
            base: base.as_str().trim_end_matches('/').to_owned(),
        })
    }

    /// Send `request` to the upstream, with the same method, path, query, headers
    /// and body, and stream back its response.
    pub async fn forward(&self, request: Request) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();

        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base, path);

        let mut headers = parts.headers;
        headers.remove(header::HOST);
        strip_hop_by_hop(&mut headers);

        let body = axum::body::to_bytes(body, MAX_REQUEST_BODY).await?;

        let upstream_response = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream_response.status();
        let mut headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

async fn forward(State(upstream): State<Upstream>, request: Request) -> Response {
    match upstream.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            error!("failed to proxy request: {}", e);
            (StatusCode::BAD_GATEWAY, "bad gateway").into_response()
        }
    }
}

/// Every request is forwarded to `upstream` and reported by `feeder`.
pub fn router(upstream: Upstream, feeder: PageviewFeeder) -> Router {
    Router::new()
        .fallback(forward)
        .with_state(upstream)
        .layer(PageviewLayer::new(feeder))
        .layer(TraceLayer::new_for_http())
}
