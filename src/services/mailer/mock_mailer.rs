use async_trait::async_trait;
use std::sync::Mutex;

use super::{MailError, Mailer};

/// Records sent emails so tests can assert on resolved recipients and
/// bodies.
#[derive(Debug, Default)]
pub struct MockMailer {
    pub sent_emails: Mutex<Vec<(String, String, String)>>,
    pub fail_send: bool,
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        if self.fail_send {
            return Err(MailError::Other("mock fail".into()));
        }
        self.sent_emails.lock().unwrap().push((
            to.to_string(),
            subject.to_string(),
            body.to_string(),
        ));
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
