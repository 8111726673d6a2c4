//! Listener configuration.

use super::error::{ListenerError, ListenerResult};
use crate::modules::actions::ActionConfig;
use crate::modules::rules::RuleConfig;
use crate::modules::tls::CertificateConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Listener protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListenerProtocol {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
    /// TCP passthrough.
    Tcp,
    /// TLS termination, then TCP.
    Tls,
    /// UDP.
    Udp,
    /// TCP and UDP on one port.
    TcpUdp,
}

impl ListenerProtocol {
    /// Check if requests are parsed and matched against rules.
    #[must_use]
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }

    /// Check if the listener terminates TLS.
    #[must_use]
    pub fn terminates_tls(&self) -> bool {
        matches!(self, Self::Https | Self::Tls)
    }

    /// Check if the listener accepts TCP connections.
    #[must_use]
    pub fn accepts_tcp(&self) -> bool {
        !matches!(self, Self::Udp)
    }

    /// Check if the listener accepts UDP datagrams.
    #[must_use]
    pub fn accepts_udp(&self) -> bool {
        matches!(self, Self::Udp | Self::TcpUdp)
    }

    /// URL scheme seen by rules and redirects.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Https | Self::Tls => "https",
            _ => "http",
        }
    }
}

impl fmt::Display for ListenerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Tcp => "TCP",
            Self::Tls => "TLS",
            Self::Udp => "UDP",
            Self::TcpUdp => "TCP_UDP",
        };
        f.write_str(name)
    }
}

/// ALPN negotiation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlpnPolicy {
    /// Offer HTTP/1.1 only.
    Http1Only,
    /// Offer HTTP/2 only.
    Http2Only,
    /// Offer HTTP/1.1, then HTTP/2.
    Http2Optional,
    /// Offer HTTP/2, then HTTP/1.1.
    Http2Preferred,
    /// No ALPN.
    None,
}

impl AlpnPolicy {
    /// Protocols offered during the handshake, most preferred first.
    #[must_use]
    pub fn protocols(&self) -> Vec<Vec<u8>> {
        let list: &[&[u8]] = match self {
            Self::Http1Only => &[b"http/1.1"],
            Self::Http2Only => &[b"h2"],
            Self::Http2Optional => &[b"http/1.1", b"h2"],
            Self::Http2Preferred => &[b"h2", b"http/1.1"],
            Self::None => &[],
        };
        list.iter().map(|p| p.to_vec()).collect()
    }
}

/// A listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Listener name.
    pub name: String,

    /// Protocol.
    pub protocol: ListenerProtocol,

    /// Port. 0 binds an ephemeral port.
    pub port: u16,

    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Certificates for HTTPS and TLS listeners.
    #[serde(default)]
    pub certificates: Vec<CertificateConfig>,

    /// ALPN policy for HTTPS and TLS listeners. HTTPS listeners without one
    /// offer HTTP/2, then HTTP/1.1.
    #[serde(default)]
    pub alpn_policy: Option<AlpnPolicy>,

    /// Action chain of the default rule.
    pub default_actions: Vec<ActionConfig>,

    /// Prioritized rules. HTTP and HTTPS only.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Target connect timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Idle timeout for UDP flows.
    #[serde(default = "default_udp_idle_timeout", with = "humantime_serde")]
    pub udp_idle_timeout: Duration,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_udp_idle_timeout() -> Duration {
    Duration::from_secs(120)
}

impl ListenerConfig {
    /// Create a localhost listener with a default action chain and no rules.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        protocol: ListenerProtocol,
        port: u16,
        default_actions: Vec<ActionConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            port,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            certificates: Vec::new(),
            alpn_policy: None,
            default_actions,
            rules: Vec::new(),
            connect_timeout: default_connect_timeout(),
            udp_idle_timeout: default_udp_idle_timeout(),
        }
    }

    /// Get the bind address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Protocols offered through ALPN.
    #[must_use]
    pub fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        match (self.alpn_policy, self.protocol) {
            (Some(policy), _) => policy.protocols(),
            (None, ListenerProtocol::Https) => AlpnPolicy::Http2Preferred.protocols(),
            (None, _) => Vec::new(),
        }
    }

    /// Check protocol-dependent constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first violation.
    pub fn validate(&self) -> ListenerResult<()> {
        let invalid = |msg: String| Err(ListenerError::InvalidConfig(msg));

        if self.name.is_empty() {
            return invalid("listener name is empty".to_string());
        }

        if self.protocol.terminates_tls() {
            if self.certificates.is_empty() {
                return invalid(format!(
                    "{} listener '{}' needs at least one certificate",
                    self.protocol, self.name
                ));
            }
            let defaults = self.certificates.iter().filter(|c| c.default).count();
            if defaults != 1 {
                return invalid(format!(
                    "listener '{}' must mark exactly one certificate as default, found {defaults}",
                    self.name
                ));
            }
        } else {
            if !self.certificates.is_empty() {
                return invalid(format!(
                    "{} listener '{}' cannot have certificates",
                    self.protocol, self.name
                ));
            }
            if self.alpn_policy.is_some() {
                return invalid(format!(
                    "ALPN policy is only valid on HTTPS and TLS listeners, not '{}'",
                    self.name
                ));
            }
        }

        if !self.protocol.is_http() {
            if !self.rules.is_empty() {
                return invalid(format!(
                    "{} listener '{}' cannot have rules",
                    self.protocol, self.name
                ));
            }
            let single_forward = matches!(self.default_actions.as_slice(), [ActionConfig::Forward(_)]);
            if !single_forward {
                return invalid(format!(
                    "{} listener '{}' default action must be a single forward",
                    self.protocol, self.name
                ));
            }
        } else if self.default_actions.is_empty() {
            return invalid(format!("listener '{}' has no default action", self.name));
        }

        if self.protocol == ListenerProtocol::Http
            && self
                .default_actions
                .iter()
                .chain(self.rules.iter().flat_map(|r| r.actions.iter()))
                .any(ActionConfig::is_authenticate)
        {
            return invalid(format!(
                "authenticate actions need an HTTPS listener, '{}' is HTTP",
                self.name
            ));
        }

        if self.connect_timeout.is_zero() {
            return invalid("connect_timeout must be positive".to_string());
        }

        if self.protocol.accepts_udp() && self.udp_idle_timeout.is_zero() {
            return invalid("udp_idle_timeout must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::actions::{FixedResponseConfig, ForwardConfig};
    use std::path::PathBuf;

    fn fixed() -> Vec<ActionConfig> {
        vec![ActionConfig::FixedResponse(FixedResponseConfig {
            status_code: 404,
            content_type: None,
            message_body: None,
        })]
    }

    fn forward() -> Vec<ActionConfig> {
        vec![ActionConfig::Forward(ForwardConfig::to_group("tg"))]
    }

    fn certificate(default: bool) -> CertificateConfig {
        CertificateConfig {
            cert_path: PathBuf::from("cert.pem"),
            key_path: PathBuf::from("key.pem"),
            chain_path: None,
            sni_names: Vec::new(),
            default,
        }
    }

    #[test]
    fn test_alpn_preference_order() {
        assert_eq!(AlpnPolicy::Http2Preferred.protocols()[0], b"h2".to_vec());
        assert_eq!(AlpnPolicy::Http2Optional.protocols()[0], b"http/1.1".to_vec());
        assert_eq!(AlpnPolicy::Http2Only.protocols(), vec![b"h2".to_vec()]);
        assert!(AlpnPolicy::None.protocols().is_empty());

        let mut https = ListenerConfig::new("web", ListenerProtocol::Https, 443, fixed());
        assert_eq!(https.alpn_protocols().len(), 2);
        https.alpn_policy = Some(AlpnPolicy::Http1Only);
        assert_eq!(https.alpn_protocols(), vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_protocol_serde() {
        #[derive(Deserialize)]
        struct P {
            protocol: ListenerProtocol,
            alpn: AlpnPolicy,
        }
        let p: P = toml::from_str("protocol = \"TCP_UDP\"\nalpn = \"HTTP2_PREFERRED\"").unwrap();
        assert_eq!(p.protocol, ListenerProtocol::TcpUdp);
        assert_eq!(p.alpn, AlpnPolicy::Http2Preferred);
        assert_eq!(ListenerProtocol::TcpUdp.to_string(), "TCP_UDP");
    }

    #[test]
    fn test_tls_needs_one_default_certificate() {
        let mut config = ListenerConfig::new("web", ListenerProtocol::Https, 443, fixed());
        assert!(config.validate().is_err());

        config.certificates = vec![certificate(false)];
        assert!(config.validate().is_err());

        config.certificates = vec![certificate(true), certificate(true)];
        assert!(config.validate().is_err());

        config.certificates = vec![certificate(true), certificate(false)];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_l4_restrictions() {
        assert!(ListenerConfig::new("tcp", ListenerProtocol::Tcp, 9000, forward())
            .validate()
            .is_ok());
        assert!(ListenerConfig::new("tcp", ListenerProtocol::Tcp, 9000, fixed())
            .validate()
            .is_err());

        let mut alpn = ListenerConfig::new("tcp", ListenerProtocol::Tcp, 9000, forward());
        alpn.alpn_policy = Some(AlpnPolicy::Http2Only);
        assert!(alpn.validate().is_err());
    }

    #[test]
    fn test_auth_needs_https() {
        let oidc: ActionConfig = toml::from_str(
            r#"
            type = "authenticate-oidc"
            issuer = "https://idp"
            authorization_endpoint = "https://idp/a"
            token_endpoint = "https://idp/t"
            client_id = "c"
            "#,
        )
        .unwrap();
        let mut actions = vec![oidc];
        actions.extend(fixed());
        let config = ListenerConfig::new("web", ListenerProtocol::Http, 80, actions);
        assert!(config.validate().is_err());
    }
}
