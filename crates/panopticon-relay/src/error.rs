//! Error types for the relay.
//!
//! Client-facing text is fixed per variant. Store detail stays in the logs.

use thiserror::Error;

/// Failures of the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Why a connection attempt was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("user not found")]
    UnknownUser,

    #[error("account is deactivated")]
    AccountDeactivated,

    #[error("authentication handshake timed out")]
    Timeout,

    #[error("account lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// WebSocket close code sent with the rejection.
    pub fn close_code(&self) -> u16 {
        match self {
            AuthError::MissingToken => 4400,
            AuthError::InvalidToken(_) => 4401,
            AuthError::AccountDeactivated => 4403,
            AuthError::UnknownUser => 4404,
            AuthError::Timeout => 4408,
            AuthError::Store(_) => 1011,
        }
    }

    /// Close reason shown to the client.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Authentication token required",
            AuthError::InvalidToken(_) => "Invalid token",
            AuthError::UnknownUser => "User not found",
            AuthError::AccountDeactivated => "Account is deactivated",
            AuthError::Timeout => "Authentication timed out",
            AuthError::Store(_) => "Authentication failed",
        }
    }
}

/// Failure of a single inbound event. Never outlives the event.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),

    #[error("sender not found")]
    SenderMissing,

    #[error("receiver not found or inactive")]
    ReceiverNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("not permitted")]
    Unauthorized,

    #[error("admin role required")]
    AdminRequired,

    #[error("superadmin role required")]
    SuperAdminRequired,

    #[error("cannot shadow ban yourself")]
    SelfShadowBan,

    #[error("send failed: {0}")]
    SendFailed(StoreError),

    #[error("delete failed: {0}")]
    DeleteFailed(StoreError),

    #[error("{0}: {1}")]
    AdminFailed(&'static str, StoreError),
}

impl RelayError {
    /// The text the initiating client sees.
    pub fn client_message(&self) -> &'static str {
        match self {
            RelayError::InvalidPayload(text) => *text,
            RelayError::SenderMissing => "Sender not found",
            RelayError::ReceiverNotFound => "Receiver not found",
            RelayError::MessageNotFound => "Message not found",
            RelayError::UserNotFound => "User not found",
            RelayError::Unauthorized => "Unauthorized",
            RelayError::AdminRequired => "Unauthorized: Admin access required",
            RelayError::SuperAdminRequired => "Unauthorized: SuperAdmin access required",
            RelayError::SelfShadowBan => "Cannot shadow ban yourself",
            RelayError::SendFailed(_) => "Failed to send message",
            RelayError::DeleteFailed(_) => "Failed to delete message",
            RelayError::AdminFailed(text, _) => *text,
        }
    }
}
