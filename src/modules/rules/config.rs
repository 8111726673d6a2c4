//! Rule configuration.

use crate::modules::actions::ActionConfig;
use serde::{Deserialize, Serialize};

/// A key/value match for a query-string condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStringValue {
    /// Parameter name pattern. Absent matches any parameter.
    #[serde(default)]
    pub key: Option<String>,
    /// Parameter value pattern.
    pub value: String,
}

/// A rule condition as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "kebab-case")]
pub enum ConditionConfig {
    /// Host header patterns (case-insensitive).
    HostHeader {
        /// Patterns.
        values: Vec<String>,
    },
    /// Path patterns (case-sensitive).
    PathPattern {
        /// Patterns.
        values: Vec<String>,
    },
    /// Header value patterns (case-insensitive).
    HttpHeader {
        /// Header name.
        name: String,
        /// Patterns.
        values: Vec<String>,
    },
    /// Exact methods.
    HttpRequestMethod {
        /// Method names.
        values: Vec<String>,
    },
    /// Query parameter patterns (case-insensitive).
    QueryString {
        /// Key/value patterns.
        values: Vec<QueryStringValue>,
    },
    /// Client address CIDR blocks.
    SourceIp {
        /// CIDR blocks.
        values: Vec<String>,
    },
}

/// A listener rule as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Priority, 1..=50000. Lower is evaluated first.
    pub priority: u32,

    /// Conditions, all of which must match.
    pub conditions: Vec<ConditionConfig>,

    /// Action chain.
    pub actions: Vec<ActionConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_conditions() {
        let rule: RuleConfig = toml::from_str(
            r#"
            priority = 10

            [[conditions]]
            field = "path-pattern"
            values = ["/api/*"]

            [[conditions]]
            field = "http-header"
            name = "X-Env"
            values = ["staging"]

            [[conditions]]
            field = "query-string"
            values = [{ key = "version", value = "v2" }, { value = "beta" }]

            [[actions]]
            type = "fixed-response"
            status_code = 200
            "#,
        )
        .unwrap();

        assert_eq!(rule.priority, 10);
        assert_eq!(rule.conditions.len(), 3);
        assert!(matches!(
            &rule.conditions[2],
            ConditionConfig::QueryString { values } if values[1].key.is_none()
        ));
    }
}
