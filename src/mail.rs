//! Sends the finished e-book to the reader's mail-in address.
use crate::config::MailConfig;
use crate::convert::Ebook;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail setting `{0}` is not configured")]
    MissingSetting(&'static str),

    #[error("Invalid {field} address: {source}")]
    InvalidAddress {
        field: &'static str,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("Invalid attachment content type: {0}")]
    ContentType(String),

    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Authenticated SMTP sender over implicit TLS.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    subject: String,
    body: String,
}

impl Mailer {
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or(MailError::MissingSetting("smtp_host"))?;
        let from = parse_mailbox("from", config.from.as_deref())?;
        let to = parse_mailbox("to", config.to.as_deref())?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)?.port(config.smtp_port);
        match (&config.username, &config.password) {
            (Some(user), Some(pass)) => {
                builder = builder.credentials(Credentials::new(
                    user.clone(),
                    pass.expose_secret().to_string(),
                ));
            }
            _ => tracing::warn!(host = %host, "No SMTP credentials configured, sending unauthenticated"),
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
            subject: config.subject.clone(),
            body: config.body.clone(),
        })
    }

    /// Mails the e-book as an attachment.
    pub async fn send(&self, ebook: &Ebook) -> Result<(), MailError> {
        let bytes = tokio::fs::read(&ebook.path)
            .await
            .map_err(|source| MailError::Attachment {
                path: ebook.path.clone(),
                source,
            })?;

        let message = build_message(
            self.from.clone(),
            self.to.clone(),
            &self.subject,
            &self.body,
            ebook.file_name(),
            ebook.format.mime_type(),
            bytes,
        )?;

        self.transport.send(message).await?;
        tracing::info!(to = %self.to, attachment = %ebook.path.display(), "Digest sent");
        Ok(())
    }
}

fn parse_mailbox(field: &'static str, value: Option<&str>) -> Result<Mailbox, MailError> {
    value
        .ok_or(MailError::MissingSetting(field))?
        .parse()
        .map_err(|source| MailError::InvalidAddress { field, source })
}

fn build_message(
    from: Mailbox,
    to: Mailbox,
    subject: &str,
    body: &str,
    file_name: String,
    mime_type: &str,
    bytes: Vec<u8>,
) -> Result<Message, MailError> {
    let content_type =
        ContentType::parse(mime_type).map_err(|e| MailError::ContentType(e.to_string()))?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .date_now()
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(body.to_string()))
                .singlepart(Attachment::new(file_name).body(bytes, content_type)),
        )?;
    Ok(message)
}
