//! Rule conditions.

use super::config::ConditionConfig;
use super::error::{RuleError, RuleResult};
use super::pattern::WildcardPattern;
use super::request::RequestAttributes;
use http::{HeaderName, Method};
use std::net::IpAddr;

/// Longest allowed method name.
const MAX_METHOD_LEN: usize = 40;

/// A key/value query-string match.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    key: Option<WildcardPattern>,
    value: WildcardPattern,
}

impl QueryMatch {
    fn matches(&self, key: &str, value: &str) -> bool {
        self.key.as_ref().map_or(true, |k| k.matches(key)) && self.value.matches(value)
    }
}

/// An IPv4 or IPv6 CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrBlock {
    network: IpAddr,
    prefix: u8,
}

impl CidrBlock {
    /// Parse `address/prefix`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem on malformed input.
    pub fn parse(cidr: &str) -> Result<Self, String> {
        let (address, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| format!("'{cidr}' is not in CIDR notation"))?;
        let network: IpAddr = address
            .parse()
            .map_err(|_| format!("'{address}' is not an IP address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("'{prefix}' is not a prefix length"))?;

        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(format!("prefix /{prefix} is longer than /{max}"));
        }
        Ok(Self { network, prefix })
    }

    /// Check whether the block contains `ip`.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            },
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            },
            _ => false,
        }
    }
}

/// A compiled rule condition. Multiple values within one condition are
/// alternatives.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Host header patterns.
    HostHeader(Vec<WildcardPattern>),
    /// Path patterns.
    PathPattern(Vec<WildcardPattern>),
    /// Header value patterns.
    HttpHeader {
        /// Header name.
        name: HeaderName,
        /// Value patterns.
        values: Vec<WildcardPattern>,
    },
    /// Exact methods.
    HttpRequestMethod(Vec<Method>),
    /// Query parameter matches.
    QueryString(Vec<QueryMatch>),
    /// Client address blocks.
    SourceIp(Vec<CidrBlock>),
}

impl Condition {
    /// Compile a configured condition.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidCondition` if there are no values or a value
    /// is malformed.
    pub fn from_config(config: &ConditionConfig) -> RuleResult<Self> {
        let field = field_name(config);
        let invalid = |reason: String| RuleError::InvalidCondition { field, reason };
        let patterns = |values: &[String], ci: bool| -> RuleResult<Vec<WildcardPattern>> {
            if values.is_empty() {
                return Err(invalid("at least one value is required".to_string()));
            }
            values
                .iter()
                .map(|v| WildcardPattern::new(v, ci).map_err(invalid))
                .collect()
        };

        let condition = match config {
            ConditionConfig::HostHeader { values } => Self::HostHeader(patterns(values, true)?),
            ConditionConfig::PathPattern { values } => {
                if let Some(bad) = values.iter().find(|v| !v.starts_with('/') && !v.starts_with('*')) {
                    return Err(invalid(format!("path pattern '{bad}' must start with '/'")));
                }
                Self::PathPattern(patterns(values, false)?)
            },
            ConditionConfig::HttpHeader { name, values } => {
                if name.len() > 40 {
                    return Err(invalid(format!("header name '{name}' is longer than 40 characters")));
                }
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| invalid(format!("'{name}' is not a valid header name")))?;
                Self::HttpHeader {
                    name,
                    values: patterns(values, true)?,
                }
            },
            ConditionConfig::HttpRequestMethod { values } => {
                if values.is_empty() {
                    return Err(invalid("at least one value is required".to_string()));
                }
                let methods = values
                    .iter()
                    .map(|v| {
                        let valid = !v.is_empty()
                            && v.len() <= MAX_METHOD_LEN
                            && v.chars().all(|c| c.is_ascii_uppercase() || c == '-' || c == '_');
                        if !valid {
                            return Err(invalid(format!(
                                "method '{v}' may only contain A-Z, '-' and '_'"
                            )));
                        }
                        Method::from_bytes(v.as_bytes())
                            .map_err(|_| invalid(format!("'{v}' is not a valid method")))
                    })
                    .collect::<RuleResult<Vec<_>>>()?;
                Self::HttpRequestMethod(methods)
            },
            ConditionConfig::QueryString { values } => {
                if values.is_empty() {
                    return Err(invalid("at least one value is required".to_string()));
                }
                let matches = values
                    .iter()
                    .map(|v| {
                        let key = v
                            .key
                            .as_deref()
                            .map(|k| WildcardPattern::new(k, true))
                            .transpose()
                            .map_err(invalid)?;
                        let value = WildcardPattern::new(&v.value, true).map_err(invalid)?;
                        Ok(QueryMatch { key, value })
                    })
                    .collect::<RuleResult<Vec<_>>>()?;
                Self::QueryString(matches)
            },
            ConditionConfig::SourceIp { values } => {
                if values.is_empty() {
                    return Err(invalid("at least one value is required".to_string()));
                }
                let blocks = values
                    .iter()
                    .map(|v| CidrBlock::parse(v).map_err(invalid))
                    .collect::<RuleResult<Vec<_>>>()?;
                Self::SourceIp(blocks)
            },
        };

        Ok(condition)
    }

    /// Get the condition's field name.
    #[must_use]
    pub fn field(&self) -> &'static str {
        match self {
            Self::HostHeader(_) => "host-header",
            Self::PathPattern(_) => "path-pattern",
            Self::HttpHeader { .. } => "http-header",
            Self::HttpRequestMethod(_) => "http-request-method",
            Self::QueryString(_) => "query-string",
            Self::SourceIp(_) => "source-ip",
        }
    }

    /// Get the number of values, counted against the per-rule limit.
    #[must_use]
    pub fn value_count(&self) -> usize {
        match self {
            Self::HostHeader(v) | Self::PathPattern(v) => v.len(),
            Self::HttpHeader { values, .. } => values.len(),
            Self::HttpRequestMethod(v) => v.len(),
            Self::QueryString(v) => v.len(),
            Self::SourceIp(v) => v.len(),
        }
    }

    /// Check if the condition may appear more than once in a rule.
    #[must_use]
    pub fn repeatable(&self) -> bool {
        matches!(self, Self::HttpHeader { .. } | Self::QueryString(_))
    }

    /// Check whether a request satisfies this condition.
    #[must_use]
    pub fn matches(&self, request: &RequestAttributes) -> bool {
        match self {
            Self::HostHeader(patterns) => request
                .host
                .as_deref()
                .is_some_and(|host| patterns.iter().any(|p| p.matches(host))),
            Self::PathPattern(patterns) => patterns.iter().any(|p| p.matches(&request.path)),
            Self::HttpHeader { name, values } => request
                .header_values(name)
                .any(|value| values.iter().any(|p| p.matches(value))),
            Self::HttpRequestMethod(methods) => methods.contains(&request.method),
            Self::QueryString(matches) => request
                .query_pairs()
                .any(|(key, value)| matches.iter().any(|m| m.matches(&key, &value))),
            Self::SourceIp(blocks) => {
                let ip = request.source_ip();
                blocks.iter().any(|b| b.contains(ip))
            },
        }
    }
}

fn field_name(config: &ConditionConfig) -> &'static str {
    match config {
        ConditionConfig::HostHeader { .. } => "host-header",
        ConditionConfig::PathPattern { .. } => "path-pattern",
        ConditionConfig::HttpHeader { .. } => "http-header",
        ConditionConfig::HttpRequestMethod { .. } => "http-request-method",
        ConditionConfig::QueryString { .. } => "query-string",
        ConditionConfig::SourceIp { .. } => "source-ip",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::rules::QueryStringValue;

    fn compile(config: ConditionConfig) -> Condition {
        Condition::from_config(&config).unwrap()
    }

    fn values(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_host_header() {
        let c = compile(ConditionConfig::HostHeader {
            values: values(&["*.example.com", "example.org"]),
        });
        assert!(c.matches(&RequestAttributes::get("/").with_host("API.Example.com")));
        assert!(c.matches(&RequestAttributes::get("/").with_host("example.org:8080")));
        assert!(!c.matches(&RequestAttributes::get("/").with_host("example.net")));
        assert!(!c.matches(&RequestAttributes::get("/")));
    }

    #[test]
    fn test_path_pattern_case_sensitive() {
        let c = compile(ConditionConfig::PathPattern {
            values: values(&["/img/*"]),
        });
        assert!(c.matches(&RequestAttributes::get("/img/a.png?size=2")));
        assert!(!c.matches(&RequestAttributes::get("/IMG/a.png")));
    }

    #[test]
    fn test_http_header() {
        let c = compile(ConditionConfig::HttpHeader {
            name: "User-Agent".to_string(),
            values: values(&["*mobile*"]),
        });
        assert!(c.matches(&RequestAttributes::get("/").with_header("user-agent", "Foo Mobile Safari")));
        assert!(!c.matches(&RequestAttributes::get("/").with_header("user-agent", "curl/8")));
        assert!(!c.matches(&RequestAttributes::get("/")));
    }

    #[test]
    fn test_method() {
        let c = compile(ConditionConfig::HttpRequestMethod {
            values: values(&["POST", "PUT"]),
        });
        assert!(c.matches(&RequestAttributes::get("/").with_method(Method::PUT)));
        assert!(!c.matches(&RequestAttributes::get("/")));

        assert!(Condition::from_config(&ConditionConfig::HttpRequestMethod {
            values: values(&["get"]),
        })
        .is_err());
    }

    #[test]
    fn test_query_string() {
        let c = compile(ConditionConfig::QueryString {
            values: vec![
                QueryStringValue {
                    key: Some("version".to_string()),
                    value: "v2*".to_string(),
                },
                QueryStringValue {
                    key: None,
                    value: "beta tester".to_string(),
                },
            ],
        });
        assert!(c.matches(&RequestAttributes::get("/?Version=V2.1")));
        assert!(c.matches(&RequestAttributes::get("/?mode=beta%20tester")));
        assert!(c.matches(&RequestAttributes::get("/?mode=beta+tester")));
        assert!(!c.matches(&RequestAttributes::get("/?version=v1")));
        assert!(!c.matches(&RequestAttributes::get("/")));
    }

    #[test]
    fn test_source_ip() {
        let c = compile(ConditionConfig::SourceIp {
            values: values(&["10.0.0.0/8", "2001:db8::/32"]),
        });
        let from = |addr: &str| RequestAttributes::get("/").with_source(addr.parse().unwrap());
        assert!(c.matches(&from("10.20.30.40:1000")));
        assert!(c.matches(&from("[::ffff:10.1.1.1]:1000")));
        assert!(c.matches(&from("[2001:db8::5]:1000")));
        assert!(!c.matches(&from("192.168.1.1:1000")));
    }

    #[test]
    fn test_cidr_parse() {
        assert!(CidrBlock::parse("10.0.0.0/8").is_ok());
        assert!(CidrBlock::parse("0.0.0.0/0").unwrap().contains("8.8.8.8".parse().unwrap()));
        assert!(CidrBlock::parse("10.0.0.1").is_err());
        assert!(CidrBlock::parse("10.0.0.0/33").is_err());
        assert!(CidrBlock::parse("::/129").is_err());
    }

    #[test]
    fn test_rejects_empty_and_bad_values() {
        assert!(Condition::from_config(&ConditionConfig::HostHeader { values: vec![] }).is_err());
        assert!(Condition::from_config(&ConditionConfig::PathPattern {
            values: values(&["no-slash"]),
        })
        .is_err());
        assert!(Condition::from_config(&ConditionConfig::PathPattern {
            values: values(&["/*/*/*/*"]),
        })
        .is_err());
        assert!(Condition::from_config(&ConditionConfig::HttpHeader {
            name: "bad header".to_string(),
            values: values(&["x"]),
        })
        .is_err());
    }
}
