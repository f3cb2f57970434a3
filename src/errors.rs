//! The outward error surface of the Request Manager (spec §7): every `Kind` the
//! core can produce, collapsed into one enum so the HTTP layer has a single
//! `IntoResponse` to implement (grounded in the teacher's
//! `impl IntoResponse for FacilitatorLocalError`, `handlers.rs`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::backend::BackendError;
use crate::events::EventCodecError;
use crate::mailbox::MailboxError;
use crate::subscriptions::SubscriptionError;
use crate::wallet::executor::ExecutorError;
use crate::wallet::owner::WalletError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid input: {0}")]
    InputError(String),
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    DeserializeElement(#[from] EventCodecError),
    #[error("retry budget exhausted")]
    MaxAttemptsReached,
    #[error("internal error: {0}")]
    InternalError(String),
}

impl GatewayError {
    /// The stable code carried in `cause.code` on an `ErrorEvent` (spec §3, §7).
    /// Text is informational; the code is what clients key error handling on.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InputError(_) => "InputError",
            GatewayError::Mailbox(MailboxError::QueueNext(_)) => "QueueNext",
            GatewayError::Mailbox(MailboxError::QueueInsert(_)) => "QueueInsert",
            GatewayError::Mailbox(MailboxError::QueueRetrieve(_)) => "QueueRetrieve",
            GatewayError::Mailbox(MailboxError::QueueDiscard(_)) => "QueueDiscard",
            GatewayError::Mailbox(MailboxError::QueueRemove(_)) => "QueueRemove",
            GatewayError::Mailbox(MailboxError::Unavailable(_)) => "InternalError",
            GatewayError::Subscription(SubscriptionError::SubscriptionAlreadyExists(_)) => {
                "SubscriptionAlreadyExists"
            }
            GatewayError::Subscription(SubscriptionError::SubscriptionNotFound(_)) => {
                "SubscriptionNotFound"
            }
            GatewayError::Subscription(_) => "InternalError",
            GatewayError::Executor(ExecutorError::Wallet(w)) => wallet_code(w),
            GatewayError::Executor(ExecutorError::Unavailable(_)) => "InternalError",
            GatewayError::Wallet(w) => wallet_code(w),
            GatewayError::Backend(_) => "InternalError",
            GatewayError::DeserializeElement(_) => "DeserializeElement",
            GatewayError::MaxAttemptsReached => "MaxAttemptsReached",
            GatewayError::InternalError(_) => "InternalError",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::InputError(_) => StatusCode::BAD_REQUEST,
            GatewayError::Subscription(SubscriptionError::SubscriptionNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::Subscription(SubscriptionError::SubscriptionAlreadyExists(_)) => {
                StatusCode::CONFLICT
            }
            GatewayError::Mailbox(MailboxError::QueueNext(
                crate::sliding_window::SlidingWindowError::QueueLimitReached(_),
            )) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn wallet_code(err: &WalletError) -> &'static str {
    match err {
        WalletError::SignedTx(_) => "SignedTx",
        WalletError::SendTransaction(_) => "SendTransaction",
        WalletError::EstimateGas(_) => "EstimateGas",
        WalletError::TransactionReceipt(_) => "TransactionReceipt",
        WalletError::FetchNonce(_) => "FetchNonce",
        WalletError::GetBalance(_) => "GetBalance",
        WalletError::GetServiceCode(_) => "GetServiceCode",
        WalletError::ServiceCodeNotDeployed => "ServiceCodeNotDeployed",
        WalletError::ExceedsBalance => "SendTransaction",
        WalletError::ExceedsBlockLimit => "SendTransaction",
        WalletError::MaxAttemptsReached => "MaxAttemptsReached",
        WalletError::Internal(_) => "InternalError",
    }
}

#[derive(Debug, Serialize)]
struct ProblemBody {
    code: String,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ProblemBody {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        tracing::warn!(code = %body.code, status = %status, "request failed");
        (status, axum::Json(body)).into_response()
    }
}
