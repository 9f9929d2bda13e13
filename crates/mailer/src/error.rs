use thiserror::Error;

/// Errors surfaced by outbound mail delivery.
#[derive(Debug, Error)]
pub enum MailerError {
    /// The transport accepted the message but delivery failed, or the
    /// message could not be built for this recipient.
    #[error("failed to send email: {0}")]
    SendFailed(String),

    /// The mail configuration is unusable (bad address, TLS setup, relay).
    #[error("invalid mailer configuration: {0}")]
    Config(String),
}

/// Convenience alias used throughout the mailer crate.
pub type MailerResult<T> = Result<T, MailerError>;
