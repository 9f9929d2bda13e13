//! SMTP delivery over lettre's async transport.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use satchel_core::config::SmtpTls;

use crate::{Mailer, MailerError, MailerResult, OutboundEmail};

/// Mail transport backed by a real SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Connect parameters are validated here; the TCP connection itself is
    /// opened lazily on the first send.
    pub fn new(
        host: &str,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        tls: SmtpTls,
        from_address: &str,
        from_name: &str,
    ) -> MailerResult<Self> {
        let mut builder = match tls {
            SmtpTls::Implicit => {
                let tls_params = TlsParameters::new(host.to_string())
                    .map_err(|e| MailerError::Config(format!("tls setup failed: {e}")))?;
                AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                    .map_err(|e| MailerError::Config(format!("smtp relay setup failed: {e}")))?
                    .port(port)
                    .tls(Tls::Wrapper(tls_params))
            }
            SmtpTls::Starttls => {
                let tls_params = TlsParameters::new(host.to_string())
                    .map_err(|e| MailerError::Config(format!("tls setup failed: {e}")))?;
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                    .map_err(|e| MailerError::Config(format!("smtp relay setup failed: {e}")))?
                    .port(port)
                    .tls(Tls::Required(tls_params))
            }
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port),
        };

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        let from = format!("{from_name} <{from_address}>")
            .parse::<Mailbox>()
            .map_err(|e| MailerError::Config(format!("invalid from address: {e}")))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutboundEmail) -> MailerResult<()> {
        let to = mail
            .to
            .parse::<Mailbox>()
            .map_err(|e| MailerError::SendFailed(format!("invalid recipient address: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(mail.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(mail.html.clone()),
                    ),
            )
            .map_err(|e| MailerError::SendFailed(format!("failed to build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailerError::SendFailed(e.to_string()))?;

        tracing::debug!(to = %mail.to, subject = %mail.subject, "smtp message accepted");
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_plaintext_transport() {
        let mailer = SmtpMailer::new(
            "localhost",
            25,
            None,
            None,
            SmtpTls::None,
            "noreply@example.com",
            "Satchel",
        );
        assert!(mailer.is_ok());
    }

    #[tokio::test]
    async fn test_new_starttls_with_credentials() {
        let mailer = SmtpMailer::new(
            "smtp.example.com",
            587,
            Some("user".to_string()),
            Some("pass".to_string()),
            SmtpTls::Starttls,
            "noreply@example.com",
            "Satchel",
        );
        assert!(mailer.is_ok());
    }

    #[test]
    fn test_new_rejects_unparseable_from() {
        let mailer = SmtpMailer::new(
            "localhost",
            25,
            None,
            None,
            SmtpTls::None,
            "no at sign",
            "Satchel",
        );
        assert!(matches!(mailer, Err(MailerError::Config(_))));
    }
}
