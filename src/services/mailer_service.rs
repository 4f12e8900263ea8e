//! services/mailer_service.rs
//! Hands a prepared mail to the email provider.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{
        header::{ContentType, Header, HeaderName, HeaderValue},
        Mailbox, MultiPart, SinglePart,
    },
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::config::app_config::{ProviderConfig, SmtpConfig};
use crate::models::mail_model::Mail;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<()>;
}

pub fn mailer_from_config(provider: &ProviderConfig) -> Result<Box<dyn Mailer>> {
    Ok(match provider {
        ProviderConfig::SendGrid { api_key, ip_pool } => {
            log::info!("Sending mail through the SendGrid API");
            Box::new(SendGridMailer::new(api_key.clone(), ip_pool.clone())?)
        }
        ProviderConfig::Smtp(smtp) => {
            log::info!("Sending mail through SMTP relay {}:{}", smtp.host, smtp.port);
            Box::new(SmtpMailer::new(smtp)?)
        }
    })
}

/// `<` and `>` in a display name break the provider's address parsing.
fn clean_name(name: &str) -> String {
    name.replace(['<', '>'], "")
}

pub struct SendGridMailer {
    http_client: Client,
    api_key: String,
    ip_pool: Option<String>,
}

impl SendGridMailer {
    pub fn new(api_key: String, ip_pool: Option<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("Failed to build SendGrid HTTP client")?;
        Ok(Self {
            http_client,
            api_key,
            ip_pool,
        })
    }

    fn request_body(&self, mail: &Mail) -> Value {
        let mut to = json!({ "email": mail.to });
        let to_name = clean_name(&mail.to_name);
        if !to_name.is_empty() {
            to["name"] = json!(to_name);
        }

        let mut from = json!({ "email": mail.from });
        if !mail.from_name.is_empty() {
            from["name"] = json!(mail.from_name);
        }

        let mut personalization = json!({ "to": [to] });
        if !mail.unique_args.is_empty() {
            personalization["custom_args"] = json!(mail.unique_args);
        }

        // SendGrid requires text/plain before text/html
        let mut content = Vec::new();
        if !mail.text.is_empty() {
            content.push(json!({ "type": "text/plain", "value": mail.text }));
        }
        if !mail.html.is_empty() {
            content.push(json!({ "type": "text/html", "value": mail.html }));
        }

        let mut body = json!({
            "personalizations": [personalization],
            "from": from,
            "subject": mail.subject,
            "content": content,
        });
        if !mail.reply_to.is_empty() {
            body["reply_to"] = json!({ "email": mail.reply_to });
        }
        if let Some(pool) = &self.ip_pool {
            body["ip_pool_name"] = json!(pool);
        }
        body
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, mail: &Mail) -> Result<()> {
        let resp = self
            .http_client
            .post(SENDGRID_SEND_URL)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(mail))
            .send()
            .await
            .context("SendGrid request failed")?;

        if resp.status() != StatusCode::ACCEPTED {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("SendGrid rejected mail ({}): {}", status, body));
        }
        Ok(())
    }
}

/// SendGrid's SMTP API header; carries the unique args through SMTP.
#[derive(Debug, Clone, PartialEq)]
struct SmtpApiHeader(String);

impl Header for SmtpApiHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-SMTPAPI")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .context("Invalid SMTP relay host")?
            .port(cfg.port)
            .timeout(Some(SEND_TIMEOUT));
        if !cfg.user.is_empty() {
            builder = builder.credentials(Credentials::new(cfg.user.clone(), cfg.pass.clone()));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }

    fn build_message(mail: &Mail) -> Result<Message> {
        let from = Mailbox::new(
            Some(mail.from_name.clone()).filter(|n| !n.is_empty()),
            mail.from.parse().context("Invalid from address")?,
        );
        let to_name = clean_name(&mail.to_name);
        let to = Mailbox::new(
            Some(to_name).filter(|n| !n.is_empty()),
            mail.to.parse().context("Invalid recipient address")?,
        );

        let mut builder = Message::builder().from(from).to(to).subject(&mail.subject);
        if !mail.reply_to.is_empty() {
            builder = builder.reply_to(
                mail.reply_to
                    .parse::<Mailbox>()
                    .context("Invalid reply-to address")?,
            );
        }
        if !mail.unique_args.is_empty() {
            let smtpapi = json!({ "unique_args": mail.unique_args }).to_string();
            builder = builder.header(SmtpApiHeader(smtpapi));
        }

        let message = match (mail.text.is_empty(), mail.html.is_empty()) {
            (false, false) => builder.multipart(MultiPart::alternative_plain_html(
                mail.text.clone(),
                mail.html.clone(),
            ))?,
            (true, false) => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(mail.html.clone()),
            )?,
            _ => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(mail.text.clone()),
            )?,
        };
        Ok(message)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &Mail) -> Result<()> {
        let message = Self::build_message(mail)?;
        self.transport
            .send(message)
            .await
            .context("SMTP relay rejected mail")?;
        Ok(())
    }
}
