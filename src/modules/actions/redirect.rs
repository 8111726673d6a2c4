//! Redirect actions with reserved keyword substitution.

use super::config::{RedirectConfig, RedirectStatus};
use super::error::{ActionError, ActionResult};
use crate::modules::rules::RequestAttributes;
use http::StatusCode;

/// Longest allowed component.
const MAX_COMPONENT_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Protocol,
    Host,
    Port,
    Path,
    Query,
}

impl Keyword {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "protocol" => Some(Self::Protocol),
            "host" => Some(Self::Host),
            "port" => Some(Self::Port),
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            _ => None,
        }
    }

    fn value<'a>(self, request: &'a RequestAttributes, port: &'a str) -> Option<&'a str> {
        match self {
            Self::Protocol => Some(request.scheme),
            Self::Host => request.host.as_deref(),
            Self::Port => Some(port),
            Self::Path => Some(request.path.strip_prefix('/').unwrap_or(&request.path)),
            Self::Query => Some(request.query.as_deref().unwrap_or("")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Keyword(Keyword),
}

/// A URL component with `#{...}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    fn parse(component: &str, source: &str) -> ActionResult<Self> {
        if source.len() > MAX_COMPONENT_LEN {
            return Err(ActionError::InvalidRedirect(format!(
                "{component} is longer than {MAX_COMPONENT_LEN} characters"
            )));
        }

        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("#{") {
            let end = rest[start..].find('}').ok_or_else(|| {
                ActionError::InvalidRedirect(format!("unterminated keyword in {component}"))
            })? + start;
            let keyword = Keyword::parse(&rest[start + 2..end]).ok_or_else(|| {
                ActionError::InvalidRedirect(format!(
                    "unknown keyword '{}' in {component}",
                    &rest[start..=end]
                ))
            })?;
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            segments.push(Segment::Keyword(keyword));
            rest = &rest[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    fn is(&self, segments: &[Segment]) -> bool {
        self.segments == segments
    }

    fn render(&self, request: &RequestAttributes, port: &str) -> Option<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Keyword(k) => out.push_str(k.value(request, port)?),
            }
        }
        Some(out)
    }
}

/// A validated redirect.
#[derive(Debug, Clone)]
pub struct RedirectAction {
    protocol: Template,
    host: Template,
    port: Template,
    path: Template,
    query: Template,
    status: StatusCode,
}

impl RedirectAction {
    /// Validate a redirect configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRedirect` for malformed components and `RedirectLoop`
    /// if protocol, host, port and path are all left unchanged.
    pub fn new(config: &RedirectConfig) -> ActionResult<Self> {
        let invalid = |msg: &str| Err(ActionError::InvalidRedirect(msg.to_string()));

        let protocol = if config.protocol.starts_with("#{") {
            config.protocol.clone()
        } else {
            config.protocol.to_ascii_uppercase()
        };
        if !matches!(protocol.as_str(), "HTTP" | "HTTPS" | "#{protocol}") {
            return invalid("protocol must be HTTP, HTTPS or #{protocol}");
        }

        if config.port != "#{port}" && !matches!(config.port.parse::<u16>(), Ok(p) if p > 0) {
            return invalid("port must be 1..=65535 or #{port}");
        }
        if config.host.is_empty() {
            return invalid("host must not be empty");
        }
        if !config.path.starts_with('/') {
            return invalid("path must start with '/'");
        }
        if config.query.starts_with('?') {
            return invalid("query must not start with '?'");
        }

        let action = Self {
            protocol: Template::parse("protocol", &protocol)?,
            host: Template::parse("host", &config.host)?,
            port: Template::parse("port", &config.port)?,
            path: Template::parse("path", &config.path)?,
            query: Template::parse("query", &config.query)?,
            status: match config.status_code {
                RedirectStatus::Permanent => StatusCode::MOVED_PERMANENTLY,
                RedirectStatus::Found => StatusCode::FOUND,
            },
        };

        let unchanged = action.protocol.is(&[Segment::Keyword(Keyword::Protocol)])
            && action.host.is(&[Segment::Keyword(Keyword::Host)])
            && action.port.is(&[Segment::Keyword(Keyword::Port)])
            && action.path.is(&[
                Segment::Literal("/".to_string()),
                Segment::Keyword(Keyword::Path),
            ]);
        if unchanged {
            return Err(ActionError::RedirectLoop);
        }

        Ok(action)
    }

    /// Get the response status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Render the target URL for a request.
    ///
    /// Returns `None` if the URL needs the request host and the request has
    /// none, or a substituted port is not a number.
    #[must_use]
    pub fn location(&self, request: &RequestAttributes) -> Option<String> {
        let request_port = request.port.to_string();

        let scheme = self.protocol.render(request, &request_port)?.to_ascii_lowercase();
        let host = self.host.render(request, &request_port)?;
        if host.is_empty() {
            return None;
        }
        let port: u16 = self.port.render(request, &request_port)?.parse().ok()?;
        let path = self.path.render(request, &request_port)?;
        let query = self.query.render(request, &request_port)?;

        let default_port = match scheme.as_str() {
            "https" => 443,
            _ => 80,
        };

        let mut url = format!("{scheme}://{host}");
        if port != default_port {
            url.push(':');
            url.push_str(&port.to_string());
        }
        url.push_str(&path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect(f: impl FnOnce(&mut RedirectConfig)) -> ActionResult<RedirectAction> {
        let mut config = RedirectConfig::default();
        f(&mut config);
        RedirectAction::new(&config)
    }

    fn request() -> RequestAttributes {
        RequestAttributes::get("/foo?a=1").with_host("example.com")
    }

    #[test]
    fn test_http_to_https() {
        let action = redirect(|c| {
            c.protocol = "HTTPS".to_string();
            c.port = "443".to_string();
            c.status_code = RedirectStatus::Permanent;
        })
        .unwrap();

        assert_eq!(action.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            action.location(&request()).unwrap(),
            "https://example.com/foo?a=1"
        );
    }

    #[test]
    fn test_path_substitution_round_trip() {
        let action = redirect(|c| {
            c.host = "new.#{host}".to_string();
            c.path = "/new/#{path}".to_string();
            c.query = "from=#{protocol}&#{query}".to_string();
            c.port = "8443".to_string();
            c.protocol = "https".to_string();
        })
        .unwrap();

        let location = action.location(&request()).unwrap();
        let url = url::Url::parse(&location).unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("new.example.com"));
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.path(), "/new/foo");
        assert_eq!(url.query(), Some("from=http&a=1"));
    }

    #[test]
    fn test_keeps_request_port() {
        let action = redirect(|c| c.path = "/moved".to_string()).unwrap();
        let req = request().with_listener("http", 8080);
        assert_eq!(
            action.location(&req).unwrap(),
            "http://example.com:8080/moved?a=1"
        );
    }

    #[test]
    fn test_empty_query_omitted() {
        let action = redirect(|c| c.path = "/moved".to_string()).unwrap();
        let req = RequestAttributes::get("/x").with_host("example.com");
        assert_eq!(action.location(&req).unwrap(), "http://example.com/moved");
    }

    #[test]
    fn test_missing_host() {
        let action = redirect(|c| c.path = "/moved".to_string()).unwrap();
        assert!(action.location(&RequestAttributes::get("/")).is_none());
    }

    #[test]
    fn test_loop_rejected() {
        assert!(matches!(redirect(|_| {}), Err(ActionError::RedirectLoop)));
        assert!(redirect(|c| c.query = "x=1".to_string()).is_err());
        assert!(redirect(|c| c.host = "other.example.com".to_string()).is_ok());
    }

    #[test]
    fn test_invalid_components() {
        assert!(redirect(|c| c.protocol = "FTP".to_string()).is_err());
        assert!(redirect(|c| c.port = "0".to_string()).is_err());
        assert!(redirect(|c| c.path = "nope".to_string()).is_err());
        assert!(redirect(|c| c.query = "?a=b".to_string()).is_err());
        assert!(redirect(|c| c.host = "#{hostname}".to_string()).is_err());
        assert!(redirect(|c| c.host = "#{host".to_string()).is_err());
    }
}
