use esync_domain::error::DomainError;
use esync_domain::model::RequestId;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    #[error("command rejected: request={request_id}, reason={reason}")]
    Rejected { request_id: RequestId, reason: String },

    #[error("no reply within {after_ms}ms: request={request_id}")]
    ReplyTimeout { request_id: RequestId, after_ms: u128 },

    #[error("gateway closed before reply: request={0}")]
    Closed(RequestId),

    #[error("config: {0}")]
    Config(String),
}
