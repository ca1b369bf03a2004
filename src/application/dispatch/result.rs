use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Uniform outcome of one purge or ban dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub code: i32,
    pub message: String,
    pub data: BTreeMap<String, String>,
}

impl DispatchResult {
    pub const OK: i32 = 0;
    pub const ERROR_GENERAL: i32 = -1;
    /// Transport-level failure.
    pub const ERROR_CURL: i32 = -2;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Self::OK, message)
    }

    pub fn general_error(message: impl Into<String>) -> Self {
        Self::new(Self::ERROR_GENERAL, message)
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == Self::OK
    }

    pub fn outcome(&self) -> &'static str {
        match self.code {
            Self::OK => "ok",
            Self::ERROR_CURL => "transport_error",
            Self::ERROR_GENERAL => "error",
            _ => "remote_status",
        }
    }

    /// `key: value\r\n` for every data entry.
    pub fn data_lines(&self) -> String {
        self.data
            .iter()
            .map(|(key, value)| format!("{key}: {value}\r\n"))
            .collect()
    }
}

impl fmt::Display for DispatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_code_then_message() {
        let result = DispatchResult::new(404, "https://example.com/a Not Found");
        assert_eq!(result.to_string(), "404 https://example.com/a Not Found");
        assert!(!result.is_ok());
        assert_eq!(result.outcome(), "remote_status");
    }

    #[test]
    fn data_lines_use_crlf() {
        let result = DispatchResult::ok("done")
            .with_data("host", "www")
            .with_data("url", "https://example.com/");
        assert_eq!(
            result.data_lines(),
            "host: www\r\nurl: https://example.com/\r\n"
        );
    }
}
