use thiserror::Error;

use crate::domain::types::HostId;

use super::result::DispatchResult;

/// Per-target dispatch failure. Always folded into a [`DispatchResult`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Transport error on \"{host_id}\": {message}")]
    Transport { host_id: HostId, message: String },
    #[error("Ban error: {code} - '{}'", .messages.join("\" \""))]
    Protocol { code: i32, messages: Vec<String> },
    #[error("Banning over HTTP is not yet supported")]
    Unsupported { host_id: HostId },
    #[error("{message}")]
    Configuration { message: String },
    #[error("{message}")]
    General { message: String },
}

impl DispatchError {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General {
            message: message.into(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            DispatchError::Transport { .. } => DispatchResult::ERROR_CURL,
            DispatchError::Protocol { code, .. } => *code,
            DispatchError::Unsupported { .. }
            | DispatchError::Configuration { .. }
            | DispatchError::General { .. } => DispatchResult::ERROR_GENERAL,
        }
    }
}

impl From<DispatchError> for DispatchResult {
    fn from(error: DispatchError) -> Self {
        DispatchResult::new(error.code(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_keeps_remote_code() {
        let result = DispatchResult::from(DispatchError::Protocol {
            code: 106,
            messages: vec!["Syntax error".to_string(), "near `~`".to_string()],
        });
        assert_eq!(result.code, 106);
        assert_eq!(result.message, "Ban error: 106 - 'Syntax error\" \"near `~`'");
    }

    #[test]
    fn unsupported_is_a_general_error() {
        let result = DispatchResult::from(DispatchError::Unsupported {
            host_id: HostId::new("www"),
        });
        assert_eq!(result.code, DispatchResult::ERROR_GENERAL);
        assert!(result.message.contains("not yet supported"));
    }

    #[test]
    fn transport_error_maps_to_curl_code() {
        let result = DispatchResult::from(DispatchError::Transport {
            host_id: HostId::new("www"),
            message: "connection refused".to_string(),
        });
        assert_eq!(result.code, DispatchResult::ERROR_CURL);
        assert!(result.message.contains("www"));
        assert!(result.message.contains("connection refused"));
    }
}
