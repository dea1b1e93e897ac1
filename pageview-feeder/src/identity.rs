use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use http::{header, HeaderName, HeaderValue, Request};

use crate::config::Settings;
use crate::error::Ineligible;

/// The raw peer address of a connection, for hosts that don't provide axum's
/// `ConnectInfo<SocketAddr>`. Insert it as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

/// What the feeder needs to know about a request once its status code is known.
/// Captured when the request enters the middleware, as the request itself moves on
/// to the next handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub host: String,
    /// Path and query, as received.
    pub url: String,
    pub user_agent: String,
    /// Value of the configured remote IP header, if any.
    pub ip_header: Option<HeaderValue>,
    pub remote_addr: Option<String>,
}

impl RequestInfo {
    pub fn from_request<B>(request: &Request<B>, ip_header: Option<&HeaderName>) -> Self {
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        let url = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_owned();

        Self {
            host: request_host(request).to_owned(),
            url,
            user_agent,
            ip_header: ip_header.and_then(|name| request.headers().get(name).cloned()),
            remote_addr: remote_addr(request),
        }
    }
}

/// The host a request was sent to: the `Host` header, or the authority of the uri
/// for HTTP/2 requests.
pub fn request_host<B>(request: &Request<B>) -> &str {
    request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().authority().map(|authority| authority.as_str()))
        .unwrap_or_default()
}

fn remote_addr<B>(request: &Request<B>) -> Option<String> {
    let extensions = request.extensions();
    if let Some(ConnectInfo(addr)) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.to_string());
    }
    extensions.get::<RemoteAddr>().map(|addr| addr.0.clone())
}

/// Resolve the IP address of the client that sent a request.
///
/// If a remote IP header is configured, it is the only accepted source: a request
/// without it is not reported, even though the peer address is known.
pub fn resolve_remote_ip(settings: &Settings, request: &RequestInfo) -> Result<IpAddr, Ineligible> {
    if let Some(name) = &settings.remote_ip_from_header {
        let value = match &request.ip_header {
            Some(value) if !value.is_empty() => value,
            _ => return Err(Ineligible::MissingIpHeader(name.clone())),
        };
        let value = value.to_str().map_err(|_| {
            Ineligible::InvalidIpHeader(String::from_utf8_lossy(value.as_bytes()).into_owned())
        })?;
        return value
            .parse()
            .map_err(|_| Ineligible::InvalidIpHeader(value.to_owned()));
    }

    let remote_addr = request
        .remote_addr
        .as_deref()
        .ok_or(Ineligible::MissingRemoteAddr)?;
    let (host, _port) = split_host_port(remote_addr)
        .ok_or_else(|| Ineligible::InvalidRemoteAddr(remote_addr.to_owned()))?;

    host.parse()
        .map_err(|_| Ineligible::InvalidRemoteIp(host.to_owned()))
}

/// Split `host:port` or `[host]:port` into host and port. Returns `None` if the
/// port is missing or the host is an unbracketed IPv6 address.
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        if host.contains(['[', ']']) || port.contains([':', '[', ']']) {
            return None;
        }
        return Some((host, port));
    }

    let (host, port) = addr.rsplit_once(':')?;
    if host.contains([':', '[', ']']) || port.contains([']', '[']) {
        return None;
    }
    Some((host, port))
}
