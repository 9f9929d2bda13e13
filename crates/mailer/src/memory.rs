//! In-memory capture transport for tests.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Mailer, MailerResult, OutboundEmail};

/// Captures rendered mail instead of delivering it. Integration tests read
/// the OTP code back out of the captured body.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All mail captured so far, oldest first.
    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }

    /// Drain and return the captured mail.
    pub async fn take(&self) -> Vec<OutboundEmail> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, mail: &OutboundEmail) -> MailerResult<()> {
        self.sent.lock().await.push(mail.clone());
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_in_order() {
        let mailer = MemoryMailer::new();
        for subject in ["first", "second"] {
            let mail = OutboundEmail {
                to: "patient@example.com".to_string(),
                subject: subject.to_string(),
                text: String::new(),
                html: String::new(),
            };
            mailer.send(&mail).await.unwrap();
        }

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subject, "first");
        assert_eq!(sent[1].subject, "second");

        assert_eq!(mailer.take().await.len(), 2);
        assert!(mailer.sent().await.is_empty());
    }
}
