use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{repos::RepoError, service::ServiceError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Diagnostic attached to error responses for the response-logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<ServiceError> for AppError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Repo(err) => AppError::Repo(err),
            ServiceError::BansDisabled => AppError::validation(error.to_string()),
        }
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound | AppError::Repo(RepoError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Domain(DomainError::Invalid { .. } | DomainError::UnknownHost { .. })
            | AppError::Repo(RepoError::InvalidInput { .. })
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Infra(InfraError::Database { .. })
            | AppError::Repo(RepoError::Timeout | RepoError::Persistence(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Repo(RepoError::Duplicate { .. } | RepoError::Integrity { .. }) => {
                StatusCode::CONFLICT
            }
            AppError::Infra(
                InfraError::Configuration { .. } | InfraError::Telemetry(_) | InfraError::Io(_),
            )
            | AppError::Domain(DomainError::Invariant { .. })
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::NotFound | AppError::Repo(RepoError::NotFound) => "Resource not found",
            AppError::Domain(DomainError::Invalid { .. } | DomainError::UnknownHost { .. })
            | AppError::Repo(RepoError::InvalidInput { .. })
            | AppError::Validation(_) => "Request could not be processed",
            AppError::Infra(InfraError::Database { .. })
            | AppError::Repo(RepoError::Timeout | RepoError::Persistence(_)) => {
                "Service temporarily unavailable"
            }
            AppError::Repo(RepoError::Duplicate { .. } | RepoError::Integrity { .. }) => {
                "Request conflicts with stored data"
            }
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io(_)) => "I/O failure during request",
            AppError::Domain(DomainError::Invariant { .. }) | AppError::Unexpected(_) => {
                "Unexpected error occurred"
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_failures_are_unavailable() {
        let response = AppError::from(InfraError::database("pool closed")).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.source, "application::error::AppError");
        assert!(report.messages[0].contains("pool closed"));
    }

    #[test]
    fn report_collects_the_source_chain() {
        let error = AppError::from(ServiceError::Repo(RepoError::invalid_input("blank uri")));
        let report = ErrorReport::from_error("test", StatusCode::BAD_REQUEST, &error);
        assert_eq!(report.messages, vec!["invalid input: blank uri"]);
    }
}
