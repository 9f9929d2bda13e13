//! Outbound email for the satchel sharing service.
//!
//! The service sends exactly two kinds of mail: the "exams shared with you"
//! notification at share creation, and the OTP challenge code during public
//! access verification. Bodies are rendered by [`templates`] and handed to a
//! [`Mailer`] transport:
//!
//! - [`SmtpMailer`] delivers over SMTP (implicit TLS, STARTTLS or plaintext)
//! - [`LogMailer`] writes mail to the log instead of delivering it, the
//!   development default
//! - [`MemoryMailer`] captures mail in memory for tests

pub mod error;
pub mod log;
pub mod memory;
pub mod smtp;
pub mod templates;

pub use error::{MailerError, MailerResult};
pub use log::LogMailer;
pub use memory::MemoryMailer;
pub use smtp::SmtpMailer;

use std::sync::Arc;

use async_trait::async_trait;
use satchel_core::MailConfig;

/// A fully rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// HTML body, sent as the alternative part.
    pub html: String,
}

/// A mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one rendered message.
    async fn send(&self, mail: &OutboundEmail) -> MailerResult<()>;

    /// Short transport name for logs.
    fn transport_name(&self) -> &'static str;
}

/// Build the mail transport described by `config`.
pub fn from_config(config: &MailConfig) -> MailerResult<Arc<dyn Mailer>> {
    config.validate().map_err(MailerError::Config)?;

    match config {
        MailConfig::Smtp {
            host,
            port,
            username,
            password,
            tls,
            from_address,
            from_name,
        } => {
            let mailer = SmtpMailer::new(
                host,
                *port,
                username.clone(),
                password.clone(),
                *tls,
                from_address,
                from_name,
            )?;
            tracing::info!(host = %host, port = %port, "outbound mail: smtp transport");
            Ok(Arc::new(mailer))
        }
        MailConfig::Log { from_address } => {
            tracing::info!("outbound mail: log transport, messages will not be delivered");
            Ok(Arc::new(LogMailer::new(from_address.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::config::SmtpTls;

    #[test]
    fn test_from_config_log() {
        let config = MailConfig::Log {
            from_address: "noreply@localhost".to_string(),
        };
        let mailer = from_config(&config).unwrap();
        assert_eq!(mailer.transport_name(), "log");
    }

    #[tokio::test]
    async fn test_from_config_smtp_plaintext() {
        let config = MailConfig::Smtp {
            host: "localhost".to_string(),
            port: 2525,
            username: None,
            password: None,
            tls: SmtpTls::None,
            from_address: "noreply@example.com".to_string(),
            from_name: "Satchel".to_string(),
        };
        let mailer = from_config(&config).unwrap();
        assert_eq!(mailer.transport_name(), "smtp");
    }

    #[test]
    fn test_from_config_rejects_half_credentials() {
        let config = MailConfig::Smtp {
            host: "smtp.example.com".to_string(),
            port: 465,
            username: Some("user".to_string()),
            password: None,
            tls: SmtpTls::Implicit,
            from_address: "noreply@example.com".to_string(),
            from_name: "Satchel".to_string(),
        };
        assert!(matches!(from_config(&config), Err(MailerError::Config(_))));
    }

    #[test]
    fn test_from_config_rejects_bad_from_address() {
        let config = MailConfig::Smtp {
            host: "localhost".to_string(),
            port: 2525,
            username: None,
            password: None,
            tls: SmtpTls::None,
            from_address: "not an address".to_string(),
            from_name: "Satchel".to_string(),
        };
        assert!(matches!(from_config(&config), Err(MailerError::Config(_))));
    }
}
