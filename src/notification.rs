use serde::Serialize;

/// A file carried by a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    /// Set for parts the HTML body references as `cid:<id>`
    pub content_id: Option<String>,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.to_string(),
            content_id: None,
            data,
        }
    }

    /// An image shown inside the body rather than listed as a download
    pub fn inline(
        content_id: &str,
        filename: impl Into<String>,
        content_type: &str,
        data: Vec<u8>,
    ) -> Self {
        Self {
            content_id: Some(content_id.to_string()),
            ..Self::new(filename, content_type, data)
        }
    }

    pub fn is_inline(&self) -> bool {
        self.content_id.is_some()
    }
}

/// One outgoing message. `recipient` holds a single address or a
/// comma-separated list for vendor mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

impl Notification {
    pub fn recipients(&self) -> Vec<&str> {
        self.recipient
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .collect()
    }

    /// Deliverable when there is at least one address and every address contains `@`
    pub fn is_deliverable(&self) -> bool {
        let recipients = self.recipients();
        !recipients.is_empty() && recipients.iter().all(|addr| addr.contains('@'))
    }
}
