use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::future::Future;

use crate::config::SmtpConfig;
use crate::error::{ConfigError, SendError};
use crate::notification::Notification;

/// Something that can deliver one notification
pub trait MailTransport: Send + Sync + 'static {
    fn send(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), SendError>> + Send;
}

/// SMTP delivery over STARTTLS with login
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Fails with `MissingCredentials` unless both user and password are set.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, ConfigError> {
        let (username, password) = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => (user.clone(), pass.clone()),
            _ => return Err(ConfigError::MissingCredentials),
        };

        let from = config
            .from
            .as_deref()
            .unwrap_or(username.as_str())
            .parse::<Mailbox>()
            .map_err(|e| ConfigError::Smtp(format!("invalid sender address: {}", e)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| ConfigError::Smtp(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(username, password))
            .build();

        Ok(SmtpMailer { transport, from })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, SendError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.subject.clone());
        for addr in notification.recipients() {
            let mailbox = addr
                .parse::<Mailbox>()
                .map_err(|_| SendError::Address(addr.to_string()))?;
            builder = builder.to(mailbox);
        }

        let (inline, files): (Vec<_>, Vec<_>) =
            notification.attachments.iter().partition(|a| a.is_inline());

        let html = SinglePart::html(notification.html_body.clone());
        let mut body = if inline.is_empty() {
            MultiPart::mixed().singlepart(html)
        } else {
            // Images referenced as cid: sit next to the HTML in a related part
            let mut related = MultiPart::related().singlepart(html);
            for attachment in inline {
                let content_id = attachment.content_id.clone().unwrap_or_default();
                related = related.singlepart(
                    MailAttachment::new_inline(content_id)
                        .body(attachment.data.clone(), content_type(&attachment.content_type)?),
                );
            }
            MultiPart::mixed().multipart(related)
        };
        for attachment in files {
            body = body.singlepart(
                MailAttachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), content_type(&attachment.content_type)?),
            );
        }

        builder
            .multipart(body)
            .map_err(|e| SendError::Build(e.to_string()))
    }
}

fn content_type(raw: &str) -> Result<ContentType, SendError> {
    ContentType::parse(raw).map_err(|e| SendError::Build(e.to_string()))
}

impl MailTransport for SmtpMailer {
    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        let message = self.build_message(notification)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        Ok(())
    }
}
