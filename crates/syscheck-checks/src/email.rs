//! Mail round trip: each run sends a tokenised message over SMTP and looks
//! for the previous run's token over IMAP.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::types::Fetch;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use futures_util::TryStreamExt;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use rustls::pki_types::ServerName;
use serde::Deserialize;
use serde_json::{json, Value};
use syscheck_core::{Check, CheckResult};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use uuid::Uuid;

use crate::executable::{last_run_data, parse_settings, CheckOutcome, Executable};

/// Run-data key holding the token sent by the run that wrote it.
pub const TOKEN_KEY: &str = "TestEMailToken";
/// Run-data key: whether the previous run's mail arrived.
pub const RECEIVED_KEY: &str = "LastEmailReceived";
/// Run-data key: seconds from send to delivery of the previous run's mail.
pub const DELIVERY_TIME_KEY: &str = "LastEmailDeliveryTime";

const TOKEN_PREFIX: &str = "SCT_";
const SUBJECT_PREFIX: &str = "Auto Generated Email From System Checker";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Delivery time recorded when the mail arrived but its dates are unreadable.
const UNKNOWN_DELIVERY: f64 = -1.0;

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    pub smtp: SmtpSettings,
    pub imap: ImapSettings,
    pub sender: String,
    pub recipient: String,
    /// Applies to each of the IMAP and SMTP sessions.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub security: SmtpSecurity,
    /// Name announced in EHLO.
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    None,
    #[default]
    Starttls,
    Tls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImapSettings {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

fn default_mailbox() -> String {
    "INBOX".into()
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{0}")]
    Transport(String),
}

impl MailError {
    fn transport(e: impl fmt::Display) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Sends the test message carrying `token`.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_token_mail(&self, settings: &EmailSettings, token: &str) -> Result<(), MailError>;
}

/// Looks for the message carrying `token` and clears out every test message.
///
/// Returns the delivery time in seconds when the message was found.
#[async_trait]
pub trait MailboxReader: Send + Sync {
    async fn collect_token_mail(&self, settings: &EmailSettings, token: &str) -> Result<Option<f64>, MailError>;
}

/// Check kind `email`.
///
/// A run can only verify the previous run's message, so a failure shows up
/// one interval late. The first run has nothing to verify and passes.
pub struct EmailRoundtripCheck {
    sender: Arc<dyn MailSender>,
    reader: Arc<dyn MailboxReader>,
}

impl EmailRoundtripCheck {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(SmtpSender), Arc::new(ImapMailbox))
    }

    pub fn with_transport(sender: Arc<dyn MailSender>, reader: Arc<dyn MailboxReader>) -> Self {
        Self { sender, reader }
    }
}

impl Default for EmailRoundtripCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executable for EmailRoundtripCheck {
    fn check_type(&self) -> &'static str {
        "email"
    }

    async fn perform(&self, check: &Check, last: Option<&CheckResult>) -> CheckOutcome {
        let settings: EmailSettings = match parse_settings(check) {
            Ok(s) => s,
            Err(e) => return CheckOutcome::unexpected(e),
        };
        let timeout = Duration::from_secs(settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let previous = last_run_data(last)
            .as_ref()
            .and_then(|d| d.get(TOKEN_KEY))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let delivery = match &previous {
            Some(token) => match within(timeout, self.reader.collect_token_mail(&settings, token)).await {
                Ok(found) => found,
                Err(MailError::Auth(e)) => {
                    return CheckOutcome::unexpected(format!("Unable to login to IMAP server: {e}"))
                }
                Err(e) => return CheckOutcome::unexpected(format!("IMAP error: {e}")),
            },
            None => None,
        };

        let token = Uuid::new_v4().simple().to_string();
        if let Err(e) = within(timeout, self.sender.send_token_mail(&settings, &token)).await {
            return CheckOutcome::unexpected(format!("Unable to send test email: {e}"));
        }
        debug!(check_id = check.check_id, %token, ?delivery, "test email sent");

        let run_data = json!({
            TOKEN_KEY: token,
            RECEIVED_KEY: delivery.is_some(),
            DELIVERY_TIME_KEY: delivery.unwrap_or(0.0),
        });
        match (previous, delivery) {
            (Some(missing), None) => CheckOutcome::failure(format!(
                "test email {TOKEN_PREFIX}{missing} sent by the previous run was not received"
            ))
            .with_run_data(run_data),
            _ => CheckOutcome::success(run_data),
        }
    }
}

async fn within<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, MailError>>,
) -> Result<T, MailError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| MailError::Transport(format!("timed out after {timeout:?}")))?
}

fn token_subject(token: &str) -> String {
    format!("{SUBJECT_PREFIX} ({TOKEN_PREFIX}{token})")
}

fn token_message(settings: &EmailSettings, token: &str) -> Result<Message, MailError> {
    let from: Mailbox = settings.sender.parse().map_err(MailError::transport)?;
    let to: Mailbox = settings.recipient.parse().map_err(MailError::transport)?;
    Message::builder()
        .from(from)
        .to(to)
        .subject(token_subject(token))
        .header(ContentType::TEXT_PLAIN)
        .body(format!(
            "This is a test email generated by the system checker.\r\n\
             Please ignore and do not delete.\r\n\r\n({TOKEN_PREFIX}{token})\r\n"
        ))
        .map_err(MailError::transport)
}

/// Seconds between the `Date` header and the server's arrival time.
fn delivery_seconds(sent: Option<&[u8]>, received: Option<DateTime<FixedOffset>>) -> f64 {
    let sent = sent
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok());
    match (sent, received) {
        (Some(sent), Some(received)) => (received - sent).num_milliseconds() as f64 / 1000.0,
        _ => UNKNOWN_DELIVERY,
    }
}

/// [`MailSender`] over lettre's async SMTP transport.
#[derive(Debug, Default)]
pub struct SmtpSender;

#[async_trait]
impl MailSender for SmtpSender {
    async fn send_token_mail(&self, settings: &EmailSettings, token: &str) -> Result<(), MailError> {
        let message = token_message(settings, token)?;
        let smtp = &settings.smtp;

        let builder = match smtp.security {
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp.host.as_str()),
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host).map_err(MailError::transport)?
            }
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host).map_err(MailError::transport)?,
        };
        let mut builder = builder.port(smtp.port);
        if let Some(domain) = &smtp.domain {
            builder = builder.hello_name(ClientId::Domain(domain.clone()));
        }
        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        builder.build().send(message).await.map_err(MailError::transport)?;
        Ok(())
    }
}

/// [`MailboxReader`] over async-imap, with rustls when `tls` is set.
#[derive(Debug, Default)]
pub struct ImapMailbox;

#[async_trait]
impl MailboxReader for ImapMailbox {
    async fn collect_token_mail(&self, settings: &EmailSettings, token: &str) -> Result<Option<f64>, MailError> {
        let imap = &settings.imap;
        let tcp = TcpStream::connect((imap.host.as_str(), imap.port))
            .await
            .map_err(MailError::transport)?;
        if imap.tls {
            let stream = tls_connect(&imap.host, tcp).await?;
            scan_mailbox(async_imap::Client::new(stream), imap, token).await
        } else {
            scan_mailbox(async_imap::Client::new(tcp), imap, token).await
        }
    }
}

async fn tls_connect(
    host: &str,
    tcp: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, MailError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(MailError::transport)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    let name = ServerName::try_from(host.to_owned()).map_err(MailError::transport)?;
    TlsConnector::from(Arc::new(config))
        .connect(name, tcp)
        .await
        .map_err(MailError::transport)
}

async fn scan_mailbox<T>(
    mut client: async_imap::Client<T>,
    imap: &ImapSettings,
    token: &str,
) -> Result<Option<f64>, MailError>
where
    T: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    let _greeting = client.read_response().await;
    let mut session = client
        .login(&imap.username, &imap.password)
        .await
        .map_err(|(e, _)| MailError::Auth(e.to_string()))?;
    session.select(&imap.mailbox).await.map_err(MailError::transport)?;

    let wanted = session
        .uid_search(format!("SUBJECT \"{TOKEN_PREFIX}{token}\""))
        .await
        .map_err(MailError::transport)?;

    let mut delivery = None;
    if let Some(uid) = wanted.iter().min() {
        let fetched: Vec<Fetch> = session
            .uid_fetch(uid.to_string(), "(INTERNALDATE ENVELOPE)")
            .await
            .map_err(MailError::transport)?
            .try_collect()
            .await
            .map_err(MailError::transport)?;
        let seconds = fetched.first().map_or(UNKNOWN_DELIVERY, |f| {
            let sent = f.envelope().and_then(|e| e.date.as_deref());
            delivery_seconds(sent, f.internal_date())
        });
        debug!(%uid, seconds, "test email found");
        delivery = Some(seconds);
    }

    // Late arrivals from earlier runs are removed with the current one.
    let stale = session
        .uid_search(format!("SUBJECT \"{SUBJECT_PREFIX}\""))
        .await
        .map_err(MailError::transport)?;
    let doomed: HashSet<u32> = wanted.union(&stale).copied().collect();
    if !doomed.is_empty() {
        let set = doomed.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        session
            .uid_store(set, "+FLAGS (\\Seen \\Deleted)")
            .await
            .map_err(MailError::transport)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(MailError::transport)?;
        session
            .expunge()
            .await
            .map_err(MailError::transport)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(MailError::transport)?;
    }

    session.logout().await.map_err(MailError::transport)?;
    Ok(delivery)
}
