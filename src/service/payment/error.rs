use crate::service::http::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Payment declined: {0}")]
    Declined(String),
    #[error("Payment not confirmed after {attempts} checks")]
    VerificationTimeout { attempts: u32 },
    #[error("Payment cancelled")]
    Cancelled,
    #[error("Cannot {action} while {state}")]
    InvalidTransition { state: String, action: &'static str },
    #[error("API error: {0}")]
    Api(#[from] ApiError),
    #[error("Other error: {0}")]
    Other(String),
}
