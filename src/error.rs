//! Structured error type for every public engine operation.
//!
//! Mirrors the teacher's hand-rolled error enums (`SettlementError`,
//! `AuthApiError`, `WindowAccountingError`) rather than pulling in a
//! derive-macro error crate: a manual `Display` impl plus `std::error::Error`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use uuid::Uuid;

/// Coarse error classification, matching §7 of the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    NotFound,
    InvalidInput,
    ConflictState,
    Insufficient,
    ConcurrencyExhausted,
    InvariantViolated,
    DeadlineExceeded,
    Fatal,
}

impl ErrorKind {
    fn status(self) -> StatusCode {
        match self {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::ConflictState => StatusCode::CONFLICT,
            ErrorKind::Insufficient => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ConcurrencyExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::InvariantViolated => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A specific, named failure mode. Every variant here appears in §6/§7 of
/// the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    MarketNotFound,
    DistributionNotFound,
    UserNotFound,
    MarketAlreadyResolved,
    MarketNotResolving,
    AlreadyRolledBack,
    InvalidWinner,
    InvalidFeeConfiguration,
    InsufficientEvidence,
    InsufficientFunds,
    CalculatorInvariantViolated,
    DistributionVerificationFailed,
    ConcurrencyExhausted,
    StoreConflict,
    StoreNotFound,
    StoreFatal,
    OperationDeadlineExceeded,
}

/// The structured error returned by every public engine operation.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionError {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub operation_id: Uuid,
}

impl ResolutionError {
    pub fn new(kind: ErrorKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            details: None,
            operation_id: Uuid::new_v4(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_operation_id(mut self, operation_id: Uuid) -> Self {
        self.operation_id = operation_id;
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, ErrorCode::Unauthorized, message)
    }

    pub fn market_not_found(market_id: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            ErrorCode::MarketNotFound,
            format!("market {market_id} not found"),
        )
    }

    pub fn distribution_not_found(distribution_id: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            ErrorCode::DistributionNotFound,
            format!("distribution {distribution_id} not found"),
        )
    }

    pub fn market_already_resolved(market_id: &str) -> Self {
        Self::new(
            ErrorKind::ConflictState,
            ErrorCode::MarketAlreadyResolved,
            format!("market {market_id} is already resolved or cancelled"),
        )
    }

    pub fn invalid_winner(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, ErrorCode::InvalidWinner, message)
    }

    pub fn invalid_fee_configuration(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvalidInput,
            ErrorCode::InvalidFeeConfiguration,
            message,
        )
    }

    pub fn insufficient_evidence(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvalidInput,
            ErrorCode::InsufficientEvidence,
            message,
        )
    }

    pub fn insufficient_funds(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Insufficient,
            ErrorCode::InsufficientFunds,
            message,
        )
    }

    pub fn calculator_invariant_violated(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvariantViolated,
            ErrorCode::CalculatorInvariantViolated,
            message,
        )
    }

    pub fn distribution_verification_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvariantViolated,
            ErrorCode::DistributionVerificationFailed,
            message,
        )
    }

    pub fn concurrency_exhausted(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ConcurrencyExhausted,
            ErrorCode::ConcurrencyExhausted,
            message,
        )
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::DeadlineExceeded,
            ErrorCode::OperationDeadlineExceeded,
            message,
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConflictState, ErrorCode::StoreConflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, ErrorCode::StoreNotFound, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, ErrorCode::StoreFatal, message)
    }

    pub fn is_conflict(&self) -> bool {
        self.code == ErrorCode::StoreConflict
    }
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:?}/{:?}] {} (op={})",
            self.kind, self.code, self.message, self.operation_id
        )
    }
}

impl std::error::Error for ResolutionError {}

impl From<rusqlite::Error> for ResolutionError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => {
                Self::not_found("requested record does not exist")
            }
            other => Self::fatal(format!("store error: {other}")),
        }
    }
}

impl From<serde_json::Error> for ResolutionError {
    fn from(e: serde_json::Error) -> Self {
        Self::fatal(format!("serialization error: {e}"))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: ErrorKind,
    code: ErrorCode,
    message: &'a str,
    operation_id: Uuid,
    details: &'a Option<serde_json::Value>,
}

impl IntoResponse for ResolutionError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let body = ErrorBody {
            kind: self.kind,
            code: self.code,
            message: &self.message,
            operation_id: self.operation_id,
            details: &self.details,
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_conflict_code_is_retryable() {
        assert!(ResolutionError::conflict("retry me").is_conflict());
        assert!(!ResolutionError::market_already_resolved("m1").is_conflict());
    }

    #[test]
    fn display_includes_operation_id() {
        let err = ResolutionError::market_not_found("m1");
        let rendered = err.to_string();
        assert!(rendered.contains("m1"));
        assert!(rendered.contains(&err.operation_id.to_string()));
    }
}
