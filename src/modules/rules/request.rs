//! Request attributes evaluated by rule conditions.

use http::header::{COOKIE, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// The parts of an incoming request that rules and actions look at.
#[derive(Debug, Clone)]
pub struct RequestAttributes {
    /// Request method.
    pub method: Method,
    /// Host without port, from the `Host` header or the URI authority.
    pub host: Option<String>,
    /// Path, always starting with `/`.
    pub path: String,
    /// Raw query string without `?`.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Client address as seen by the listener.
    pub source: SocketAddr,
    /// `http` or `https`.
    pub scheme: &'static str,
    /// Listener port.
    pub port: u16,
}

impl RequestAttributes {
    /// Build from a parsed request head.
    #[must_use]
    pub fn from_parts(
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        source: SocketAddr,
        scheme: &'static str,
        port: u16,
    ) -> Self {
        let host = headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| uri.authority().map(|a| a.as_str()))
            .map(strip_port)
            .filter(|h| !h.is_empty())
            .map(str::to_string);

        let path = match uri.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };

        Self {
            method: method.clone(),
            host,
            path,
            query: uri.query().map(str::to_string),
            headers: headers.clone(),
            source,
            scheme,
            port,
        }
    }

    /// Start building a GET request, mostly for tests and benchmarks.
    #[must_use]
    pub fn get(path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path.to_string(), None),
        };
        Self {
            method: Method::GET,
            host: None,
            path,
            query,
            headers: HeaderMap::new(),
            source: SocketAddr::from(([127, 0, 0, 1], 40000)),
            scheme: "http",
            port: 80,
        }
    }

    /// Set the host.
    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(strip_port(host).to_string());
        self
    }

    /// Set the method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Set the client address.
    #[must_use]
    pub fn with_source(mut self, source: SocketAddr) -> Self {
        self.source = source;
        self
    }

    /// Set scheme and listener port.
    #[must_use]
    pub fn with_listener(mut self, scheme: &'static str, port: u16) -> Self {
        self.scheme = scheme;
        self.port = port;
        self
    }

    /// Client IP, with IPv4-mapped IPv6 addresses unwrapped.
    #[must_use]
    pub fn source_ip(&self) -> IpAddr {
        self.source.ip().to_canonical()
    }

    /// Decoded query parameters.
    pub fn query_pairs(&self) -> impl Iterator<Item = (Cow<'_, str>, Cow<'_, str>)> {
        url::form_urlencoded::parse(self.query.as_deref().unwrap_or("").as_bytes())
    }

    /// Values of a header, skipping non-UTF-8 values.
    pub fn header_values<'a>(&'a self, name: &HeaderName) -> impl Iterator<Item = &'a str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    /// Request cookies by name. The first occurrence of a name wins.
    #[must_use]
    pub fn cookies(&self) -> HashMap<String, String> {
        let mut cookies = HashMap::new();
        for header in self.header_values(&COOKIE) {
            for pair in header.split(';') {
                if let Some((name, value)) = pair.split_once('=') {
                    cookies
                        .entry(name.trim().to_string())
                        .or_insert_with(|| value.trim().to_string());
                }
            }
        }
        cookies
    }

    /// Path and query as sent by the client.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }
}

/// Strip a trailing `:port` from a host, handling bracketed IPv6.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
