//! Posted form values with per-field validation errors.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Loose RFC 5322 shape check: local part, `@`, dot-separated labels.
pub static EMAIL_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email pattern compiles")
});

/// Error key for messages that belong to the form rather than one field.
pub const GENERIC: &str = "generic";

/// A submitted form: its values, and any validation errors by field.
///
/// Serialized into template data so pages can redisplay what the user typed
/// next to the messages for each field.
#[derive(Debug, Default, Serialize)]
pub struct Form {
    values: HashMap<String, String>,
    errors: BTreeMap<String, Vec<String>>,
}

impl Form {
    /// An empty form, for the first render of a page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an `application/x-www-form-urlencoded` body. Repeated keys keep
    /// the first value.
    pub fn parse(body: &[u8]) -> Result<Self, serde_urlencoded::de::Error> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)?;
        let mut values = HashMap::with_capacity(pairs.len());
        for (k, v) in pairs {
            values.entry(k).or_insert(v);
        }
        Ok(Self { values, errors: BTreeMap::new() })
    }

    /// The submitted value, or `""`.
    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map_or("", String::as_str)
    }

    pub fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.entry(field.to_owned()).or_default().push(message.into());
    }

    /// First error recorded for `field`.
    pub fn error(&self, field: &str) -> Option<&str> {
        self.errors.get(field).and_then(|e| e.first()).map(String::as_str)
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Each field must be present and not just whitespace.
    pub fn required(&mut self, fields: &[&str]) {
        for field in fields {
            if self.get(field).trim().is_empty() {
                self.add_error(field, "This field cannot be blank");
            }
        }
    }

    /// At most `max` characters. Blank values pass; pair with [`required`](Self::required).
    pub fn max_length(&mut self, field: &str, max: usize) {
        let value = self.get(field);
        if !value.is_empty() && value.chars().count() > max {
            self.add_error(field, format!("This field is too long (maximum is {max} characters)"));
        }
    }

    /// At least `min` characters. Blank values pass.
    pub fn min_length(&mut self, field: &str, min: usize) {
        let value = self.get(field);
        if !value.is_empty() && value.chars().count() < min {
            self.add_error(field, format!("This field is too short (minimum is {min} characters)"));
        }
    }

    /// Value must be one of `options`. Blank values pass.
    pub fn permitted_values(&mut self, field: &str, options: &[&str]) {
        let value = self.get(field);
        if !value.is_empty() && !options.contains(&value) {
            self.add_error(field, "This field is invalid");
        }
    }

    /// Value must match `pattern`. Blank values pass.
    pub fn matches_pattern(&mut self, field: &str, pattern: &Regex) {
        let value = self.get(field);
        if !value.is_empty() && !pattern.is_match(value) {
            self.add_error(field, "This field is invalid");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decodes_and_keeps_first_value() {
        let form = Form::parse(b"title=Hello+world&content=a%26b&title=second").unwrap();
        assert_eq!(form.get("title"), "Hello world");
        assert_eq!(form.get("content"), "a&b");
        assert_eq!(form.get("missing"), "");
        assert!(form.valid());
    }

    #[test]
    fn required_rejects_blank_and_whitespace() {
        let mut form = Form::parse(b"title=&content=+++&expires=7").unwrap();
        form.required(&["title", "content", "expires"]);
        assert_eq!(form.error("title"), Some("This field cannot be blank"));
        assert_eq!(form.error("content"), Some("This field cannot be blank"));
        assert_eq!(form.error("expires"), None);
        assert!(!form.valid());
    }

    #[test]
    fn length_limits_count_characters() {
        let long = "é".repeat(101);
        let mut form = Form::parse(format!("title={long}&password=short").as_bytes()).unwrap();
        form.max_length("title", 100);
        form.min_length("password", 10);
        assert_eq!(form.error("title"), Some("This field is too long (maximum is 100 characters)"));
        assert_eq!(form.error("password"), Some("This field is too short (minimum is 10 characters)"));

        let mut ok = Form::parse("title=ééé".as_bytes()).unwrap();
        ok.max_length("title", 3);
        assert!(ok.valid());
    }

    #[test]
    fn permitted_values() {
        let mut form = Form::parse(b"expires=30").unwrap();
        form.permitted_values("expires", &["365", "7", "1"]);
        assert_eq!(form.error("expires"), Some("This field is invalid"));
    }

    #[test]
    fn email_pattern() {
        for good in ["alice@example.com", "bob.smith+tag@mail.example.org"] {
            let mut form = Form::new();
            form.values.insert("email".into(), good.into());
            form.matches_pattern("email", &EMAIL_RX);
            assert!(form.valid(), "{good}");
        }
        for bad in ["alice", "alice@", "@example.com", "alice@-example.com"] {
            let mut form = Form::new();
            form.values.insert("email".into(), bad.into());
            form.matches_pattern("email", &EMAIL_RX);
            assert!(!form.valid(), "{bad}");
        }
    }
}
