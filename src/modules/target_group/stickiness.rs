//! Cookie-based stickiness.
//!
//! Cookie values are URL-safe base64 of `group|target|expiry`, where expiry
//! is in Unix seconds. A cookie only pins a request if it names this group,
//! has not expired, and its target is currently healthy.

use super::config::{StickinessConfig, StickinessKind};
use super::target::TargetId;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cookie issued for `lb_cookie` stickiness.
pub const LB_COOKIE: &str = "AWSALB";

/// Cookie issued for `app_cookie` stickiness.
pub const APP_COOKIE: &str = "AWSALBAPP";

/// Cookie issued for target-group stickiness on weighted forwards.
pub const GROUP_COOKIE: &str = "AWSALBTG";

/// A cookie the load balancer adds to a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyCookie {
    /// Cookie name.
    pub name: String,
    /// Encoded value.
    pub value: String,
    /// Lifetime.
    pub max_age: Duration,
    /// Only set the cookie if the target's response sets this cookie.
    pub requires_app_cookie: Option<String>,
}

impl StickyCookie {
    /// Render as a `Set-Cookie` header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!(
            "{}={}; Max-Age={}; Path=/",
            self.name,
            self.value,
            self.max_age.as_secs()
        )
    }
}

/// Stickiness policy of one target group.
#[derive(Debug, Clone)]
pub struct Stickiness {
    kind: StickinessKind,
    duration: Duration,
    app_cookie_name: Option<String>,
}

impl Stickiness {
    /// Build from configuration. `None` when stickiness is disabled.
    #[must_use]
    pub fn from_config(config: &StickinessConfig) -> Option<Self> {
        config.enabled.then(|| Self {
            kind: config.kind,
            duration: config.duration,
            app_cookie_name: config.app_cookie_name.clone(),
        })
    }

    /// Get the name of the cookie the load balancer reads and writes.
    #[must_use]
    pub fn cookie_name(&self) -> &'static str {
        match self.kind {
            StickinessKind::LbCookie => LB_COOKIE,
            StickinessKind::AppCookie => APP_COOKIE,
        }
    }

    /// Get the cookie lifetime.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Find the target a request is pinned to, if any.
    ///
    /// The caller still has to check that the target is healthy.
    #[must_use]
    pub fn pinned_target(
        &self,
        group: &str,
        cookies: &HashMap<String, String>,
        now: SystemTime,
    ) -> Option<TargetId> {
        if let Some(app_cookie) = &self.app_cookie_name {
            if self.kind == StickinessKind::AppCookie && !cookies.contains_key(app_cookie) {
                return None;
            }
        }

        let claim = decode_claim(cookies.get(self.cookie_name())?, now)?;
        match claim.as_slice() {
            [name, target] if name == group => target.parse().ok().map(TargetId),
            _ => None,
        }
    }

    /// Issue a cookie pinning the client to `target`.
    #[must_use]
    pub fn issue(&self, group: &str, target: TargetId, now: SystemTime) -> StickyCookie {
        let requires_app_cookie = match self.kind {
            StickinessKind::LbCookie => None,
            StickinessKind::AppCookie => self.app_cookie_name.clone(),
        };

        StickyCookie {
            name: self.cookie_name().to_string(),
            value: encode_claim(&[group, &target.0.to_string()], now + self.duration),
            max_age: self.duration,
            requires_app_cookie,
        }
    }
}

/// Encode claim fields plus an expiry into a cookie value.
pub(crate) fn encode_claim(fields: &[&str], expires: SystemTime) -> String {
    let expires = expires
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut raw = fields.join("|");
    raw.push('|');
    raw.push_str(&expires.to_string());
    URL_SAFE_NO_PAD.encode(raw)
}

/// Decode a cookie value, dropping it if malformed or expired.
pub(crate) fn decode_claim(value: &str, now: SystemTime) -> Option<Vec<String>> {
    let raw = URL_SAFE_NO_PAD.decode(value.trim()).ok()?;
    let raw = String::from_utf8(raw).ok()?;

    let (fields, expires) = raw.rsplit_once('|')?;
    let expires = UNIX_EPOCH.checked_add(Duration::from_secs(expires.parse().ok()?))?;
    if expires <= now {
        return None;
    }

    Some(fields.split('|').map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lb_cookie() -> Stickiness {
        Stickiness::from_config(&StickinessConfig {
            enabled: true,
            duration: Duration::from_secs(60),
            ..Default::default()
        })
        .unwrap()
    }

    fn jar(name: &str, value: &str) -> HashMap<String, String> {
        let mut cookies = HashMap::new();
        cookies.insert(name.to_string(), value.to_string());
        cookies
    }

    #[test]
    fn test_disabled() {
        assert!(Stickiness::from_config(&StickinessConfig::default()).is_none());
    }

    #[test]
    fn test_issue_and_pin() {
        let sticky = lb_cookie();
        let now = SystemTime::now();
        let cookie = sticky.issue("web", TargetId(7), now);
        assert_eq!(cookie.name, LB_COOKIE);
        assert!(cookie.header_value().starts_with("AWSALB="));
        assert!(cookie.header_value().contains("Max-Age=60"));

        let cookies = jar(LB_COOKIE, &cookie.value);
        assert_eq!(sticky.pinned_target("web", &cookies, now), Some(TargetId(7)));
        assert_eq!(sticky.pinned_target("api", &cookies, now), None);
    }

    #[test]
    fn test_expired_cookie_ignored() {
        let sticky = lb_cookie();
        let issued = SystemTime::now();
        let cookie = sticky.issue("web", TargetId(1), issued);
        let later = issued + Duration::from_secs(61);
        assert_eq!(
            sticky.pinned_target("web", &jar(LB_COOKIE, &cookie.value), later),
            None
        );
    }

    #[test]
    fn test_out_of_range_expiry_ignored() {
        let sticky = lb_cookie();
        let forged = URL_SAFE_NO_PAD.encode(format!("web|1|{}", u64::MAX));
        let cookies = jar(LB_COOKIE, &forged);
        assert_eq!(sticky.pinned_target("web", &cookies, SystemTime::now()), None);
        assert_eq!(decode_claim(&forged, SystemTime::now()), None);
    }

    #[test]
    fn test_garbage_cookie_ignored() {
        let sticky = lb_cookie();
        let now = SystemTime::now();
        assert_eq!(sticky.pinned_target("web", &jar(LB_COOKIE, "%%%"), now), None);
        let forged = URL_SAFE_NO_PAD.encode("web|x|99999999999");
        assert_eq!(sticky.pinned_target("web", &jar(LB_COOKIE, &forged), now), None);
    }

    #[test]
    fn test_app_cookie_requires_application_cookie() {
        let sticky = Stickiness::from_config(&StickinessConfig {
            enabled: true,
            kind: StickinessKind::AppCookie,
            duration: Duration::from_secs(60),
            app_cookie_name: Some("SESSION".to_string()),
        })
        .unwrap();
        let now = SystemTime::now();
        let cookie = sticky.issue("web", TargetId(3), now);
        assert_eq!(cookie.name, APP_COOKIE);
        assert_eq!(cookie.requires_app_cookie.as_deref(), Some("SESSION"));

        let mut cookies = jar(APP_COOKIE, &cookie.value);
        assert_eq!(sticky.pinned_target("web", &cookies, now), None);

        cookies.insert("SESSION".to_string(), "abc".to_string());
        assert_eq!(sticky.pinned_target("web", &cookies, now), Some(TargetId(3)));
    }
}
