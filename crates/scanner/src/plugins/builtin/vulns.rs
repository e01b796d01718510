//! Built-in vulnerability checks.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::super::catalog::{HttpClient, VerifyResult, VulnCheck};

/// Database error fingerprints indicating an injectable parameter.
const SQL_ERRORS: &[&str] = &[
    r"SQL syntax.*MySQL",
    r"Warning.*mysql_.*",
    r"MySqlException",
    r"PostgreSQL.*ERROR",
    r"Warning.*pg_.*",
    r"ORA-\d{5}",
    r"Microsoft SQL Server",
    r"SQLite3::SQLException",
    r"Syntax error.*query",
    r"unclosed quotation mark",
];

static SQL_ERROR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    SQL_ERRORS.iter().filter_map(|p| Regex::new(&format!("(?i){p}")).ok()).collect()
});

const SQLI_PAYLOADS: &[&str] = &[
    "'",
    "\"",
    "' OR '1'='1",
    "\" OR \"1\"=\"1",
    "1' AND '1'='1",
    "1\" AND \"1\"=\"1",
    "' UNION SELECT NULL--",
    "' UNION SELECT NULL,NULL--",
];

/// Basic SQL injection checker: probes the `id` parameter with error-based
/// payloads and fingerprints database error messages in the response.
#[derive(Debug, Default)]
pub struct SqlInjectionBasic;

impl SqlInjectionBasic {
    /// Create the checker.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VulnCheck for SqlInjectionBasic {
    async fn verify(
        &self,
        target: &str,
        client: &dyn HttpClient,
        _options: &Map<String, Value>,
    ) -> VerifyResult {
        let mut result = VerifyResult::clean("SQL Injection", "high");

        for payload in SQLI_PAYLOADS {
            let test_url = format!("{target}?id={payload}");

            let response = match client.get(&test_url).await {
                Ok(response) => response,
                Err(e) => {
                    debug!("sqli probe request failed: {}", e);
                    continue;
                }
            };

            for pattern in SQL_ERROR_PATTERNS.iter() {
                if let Some(matched) = pattern.find(&response.body) {
                    result.vulnerable = true;
                    result.details.push(json!({
                        "payload": payload,
                        "error_pattern": matched.as_str(),
                        "status_code": response.status,
                    }));
                    result.evidence = Some(matched.as_str().to_string());
                    return result;
                }
            }
        }

        result
    }
}

const XSS_PAYLOADS: &[&str] = &[
    "<script>alert('XSS')</script>",
    "<img src=x onerror=alert('XSS')>",
    "javascript:alert('XSS')",
    "<svg onload=alert('XSS')>",
    "'\"><script>alert('XSS')</script>",
    "<body onload=alert('XSS')>",
];

static XSS_DETECTION_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?is)<script.*?>.*?alert.*?</script>").ok());

/// Reflected XSS checker: injects markup through the `q` parameter and
/// looks for the payload (or a script/alert pattern) echoed back.
#[derive(Debug, Default)]
pub struct XssReflected;

impl XssReflected {
    /// Create the checker.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VulnCheck for XssReflected {
    async fn verify(
        &self,
        target: &str,
        client: &dyn HttpClient,
        _options: &Map<String, Value>,
    ) -> VerifyResult {
        let mut result = VerifyResult::clean("Reflected XSS", "medium");

        for payload in XSS_PAYLOADS {
            let test_url = format!("{target}?q={payload}");

            let response = match client.get(&test_url).await {
                Ok(response) => response,
                Err(e) => {
                    debug!("xss probe request failed: {}", e);
                    continue;
                }
            };

            if response.body.contains(payload) {
                result.vulnerable = true;
                result.details.push(json!({
                    "payload": payload,
                    "location": "GET parameter",
                    "status_code": response.status,
                }));
                let excerpt: String = payload.chars().take(50).collect();
                result.evidence = Some(format!("Payload reflected: {excerpt}..."));
            } else if XSS_DETECTION_PATTERN
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(&response.body))
            {
                result.vulnerable = true;
                result.details.push(json!({
                    "payload": payload,
                    "location": "GET parameter",
                    "pattern_matched": true,
                }));
            }
        }

        result
    }
}
