//! Email Gateway
//!
//! The mail capability consumed by the assistant's functions: deliver one
//! message over SMTP, and read the subjects of the newest inbox messages
//! over IMAP. Both operations are blocking protocol I/O; callers running on
//! the async runtime must move them onto a blocking worker.

use lettre::{
    Message, SmtpTransport, Transport, message::header::ContentType,
    transport::smtp::authentication::Credentials,
};
use mailparse::MailHeaderMap;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Invalid address '{0}'")]
    Address(String),
    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("IMAP error: {0}")]
    Imap(#[from] imap::Error),
    #[error("Failed to parse message headers: {0}")]
    Parse(#[from] mailparse::MailParseError),
}

/// A plain-text message to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Blocking mail capability.
#[cfg_attr(test, mockall::automock)]
pub trait EmailGateway: Send + Sync {
    /// Delivers one message.
    fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError>;

    /// Returns up to `count` decoded subjects of the newest inbox messages,
    /// oldest first. Fewer are returned when the inbox holds fewer.
    fn fetch_latest_subjects(&self, count: usize) -> Result<Vec<String>, EmailError>;
}

/// Account settings for [`MailServerGateway`].
#[derive(Clone)]
pub struct MailAccount {
    pub address: String,
    pub password: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub imap_host: String,
    pub imap_port: u16,
}

impl fmt::Debug for MailAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailAccount")
            .field("address", &self.address)
            .field("password", &"[REDACTED]")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .finish()
    }
}

/// SMTP (STARTTLS) delivery and IMAP (implicit TLS) inbox access for a
/// single account.
#[derive(Debug, Clone)]
pub struct MailServerGateway {
    account: MailAccount,
}

impl MailServerGateway {
    pub fn new(account: MailAccount) -> Self {
        Self { account }
    }
}

impl EmailGateway for MailServerGateway {
    fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let message = Message::builder()
            .from(
                email
                    .from
                    .parse()
                    .map_err(|_| EmailError::Address(email.from.clone()))?,
            )
            .to(email
                .to
                .parse()
                .map_err(|_| EmailError::Address(email.to.clone()))?)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())?;

        let mailer = SmtpTransport::starttls_relay(&self.account.smtp_host)?
            .port(self.account.smtp_port)
            .credentials(Credentials::new(
                self.account.address.clone(),
                self.account.password.clone(),
            ))
            .build();

        mailer.send(&message)?;
        debug!(to = %email.to, "SMTP delivery accepted");
        Ok(())
    }

    fn fetch_latest_subjects(&self, count: usize) -> Result<Vec<String>, EmailError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let tls = native_tls::TlsConnector::builder().build()?;
        let client = imap::connect(
            (self.account.imap_host.as_str(), self.account.imap_port),
            self.account.imap_host.as_str(),
            &tls,
        )?;
        let mut session = client
            .login(&self.account.address, &self.account.password)
            .map_err(|(e, _)| e)?;

        session.select("INBOX")?;
        let mut ids: Vec<u32> = session.search("ALL")?.into_iter().collect();
        ids.sort_unstable();
        let latest = latest(&ids, count);

        let mut subjects = Vec::with_capacity(latest.len());
        for id in latest {
            let fetches = match session.fetch(id.to_string(), "RFC822.HEADER") {
                Ok(fetches) => fetches,
                Err(e) => {
                    warn!(message = id, error = %e, "Skipping message that failed to fetch");
                    continue;
                }
            };
            for fetch in fetches.iter() {
                if let Some(header) = fetch.header() {
                    subjects.push(decode_subject(header)?);
                }
            }
        }

        session.logout()?;
        Ok(subjects)
    }
}

/// The last `count` entries of `items`, in their original order.
pub fn latest<T>(items: &[T], count: usize) -> &[T] {
    &items[items.len().saturating_sub(count)..]
}

/// Extracts the `Subject` header and decodes any RFC 2047 encoded words into
/// plain text. A message without a subject yields an empty string.
pub fn decode_subject(raw_headers: &[u8]) -> Result<String, EmailError> {
    let (headers, _) = mailparse::parse_headers(raw_headers)?;
    Ok(headers.get_first_value("Subject").unwrap_or_default())
}
