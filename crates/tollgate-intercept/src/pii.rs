//! PII redaction for text headed to telemetry.
//!
//! Matches are replaced with `[REDACTED_<KIND>]`. Patterns run in a fixed
//! order so that longer digit runs (card numbers, SSNs) are claimed before
//! the phone pattern can take a piece of them.

use regex::Regex;
use serde_json::Value;

use tollgate_contracts::error::{TollgateError, TollgateResult};

const BUILTIN: &[(&str, &str)] = &[
    ("EMAIL", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
    ("CREDIT_CARD", r"\b(?:\d{4}[- ]?){3}\d{4}\b"),
    ("SSN", r"\b\d{3}-\d{2}-\d{4}\b"),
    ("PHONE", r"(?:\+?1[-. ]?)?(?:\(\d{3}\)|\b\d{3})[-. ]?\d{3}[-. ]?\d{4}\b"),
    ("IPV4", r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
];

#[derive(Debug, Clone)]
pub struct PiiRedactor {
    patterns: Vec<(String, Regex)>,
}

impl PiiRedactor {
    /// Built-in patterns: email, credit card, SSN, phone, IPv4.
    pub fn new() -> Self {
        let patterns = BUILTIN
            .iter()
            .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind.to_string(), re)))
            .collect();
        Self { patterns }
    }

    /// Built-ins plus `(KIND, regex)` pairs, applied after the built-ins.
    ///
    /// Returns `TollgateError::Config` naming the first pattern that does not
    /// compile.
    pub fn with_extra_patterns<I, K, P>(extra: I) -> TollgateResult<Self>
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: AsRef<str>,
    {
        let mut redactor = Self::new();
        for (kind, pattern) in extra {
            let kind = kind.into();
            let re = Regex::new(pattern.as_ref())
                .map_err(|e| TollgateError::config(format!("invalid PII pattern for {}: {}", kind, e)))?;
            redactor.patterns.push((kind, re));
        }
        Ok(redactor)
    }

    pub fn redact_text(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (kind, re) in &self.patterns {
            if re.is_match(&out) {
                out = re.replace_all(&out, format!("[REDACTED_{}]", kind).as_str()).into_owned();
            }
        }
        out
    }

    /// Redact every string inside `value`. Keys and non-string scalars are
    /// left alone.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact_text(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), self.redact(v))).collect()),
            other => other.clone(),
        }
    }
}

impl Default for PiiRedactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn redact(text: &str) -> String {
        PiiRedactor::new().redact_text(text)
    }

    #[test]
    fn redacts_each_builtin_kind() {
        let cases = [
            ("Contact john.doe@example.com for details", "[REDACTED_EMAIL]", "john.doe@example.com"),
            ("Call me at 555-123-4567", "[REDACTED_PHONE]", "555-123-4567"),
            ("Phone: (555) 123-4567", "[REDACTED_PHONE]", "123-4567"),
            ("SSN: 123-45-6789", "[REDACTED_SSN]", "123-45-6789"),
            ("Card: 4111 1111 1111 1111", "[REDACTED_CREDIT_CARD]", "4111"),
            ("Server at 192.168.1.100", "[REDACTED_IPV4]", "192.168.1.100"),
        ];
        for (input, marker, secret) in cases {
            let out = redact(input);
            assert!(out.contains(marker), "{:?} -> {:?}", input, out);
            assert!(!out.contains(secret), "{:?} leaked in {:?}", secret, out);
        }
    }

    #[test]
    fn clean_text_is_unchanged() {
        let text = "Hello world, nothing sensitive here";
        assert_eq!(redact(text), text);
    }

    #[test]
    fn several_kinds_in_one_string() {
        let out = redact("Email: a@b.com, Phone: 555-111-2222, SSN: 123-45-6789");
        assert!(out.contains("[REDACTED_EMAIL]"));
        assert!(out.contains("[REDACTED_PHONE]"));
        assert!(out.contains("[REDACTED_SSN]"));
    }

    #[test]
    fn redacts_nested_json_strings_only() {
        let value = json!({
            "user": {"contact": "user@test.com", "phone": "555-111-2222"},
            "list": ["user@test.com", "no-pii"],
            "count": 42,
            "ok": true,
            "none": null
        });
        let out = PiiRedactor::new().redact(&value);
        assert_eq!(out["user"]["contact"], "[REDACTED_EMAIL]");
        assert_eq!(out["user"]["phone"], "[REDACTED_PHONE]");
        assert_eq!(out["list"][1], "no-pii");
        assert_eq!(out["count"], 42);
        assert_eq!(out["ok"], true);
        assert!(out["none"].is_null());
    }

    #[test]
    fn extra_patterns_apply() {
        let redactor = PiiRedactor::with_extra_patterns([("EMPLOYEE_ID", r"EMP-\d{6}")]).unwrap();
        let out = redactor.redact_text("Employee EMP-123456 logged in");
        assert!(out.contains("[REDACTED_EMPLOYEE_ID]"));
        assert!(!out.contains("EMP-123456"));
    }

    #[test]
    fn bad_extra_pattern_is_config_error() {
        let err = PiiRedactor::with_extra_patterns([("BROKEN", "(")]).unwrap_err();
        assert!(matches!(err, TollgateError::Config { .. }));
    }
}
