//! Log-only transport, the development default when SMTP is not configured.

use async_trait::async_trait;

use crate::{Mailer, MailerResult, OutboundEmail};

/// Writes outbound mail to the log instead of delivering it. Bodies carry
/// OTP codes, so they are only logged at debug level.
pub struct LogMailer {
    from_address: String,
}

impl LogMailer {
    pub fn new(from_address: String) -> Self {
        Self { from_address }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutboundEmail) -> MailerResult<()> {
        tracing::info!(
            from = %self.from_address,
            to = %mail.to,
            subject = %mail.subject,
            "outbound mail (log transport, not delivered)"
        );
        tracing::debug!(body = %mail.text, "outbound mail body");
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_always_succeeds() {
        let mailer = LogMailer::new("noreply@localhost".to_string());
        let mail = OutboundEmail {
            to: "patient@example.com".to_string(),
            subject: "test".to_string(),
            text: "body".to_string(),
            html: "<p>body</p>".to_string(),
        };
        assert!(mailer.send(&mail).await.is_ok());
    }
}
