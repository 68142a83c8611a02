//! services/email_service.rs
//! Canal de email sobre SMTP (lettre, transporte async de tokio).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::{config::channel_config::SmtpConfig, services::template_service::EmailContent};

const SMTP_SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait EmailChannel: Send + Sync {
    async fn send_email(&self, address: &str, content: &EmailContent) -> Result<()>;
}

#[derive(Clone)]
pub struct SmtpEmailChannel {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailChannel {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.user)
            .parse()
            .context("Invalid from address")?;

        let tls_params = TlsParameters::new(config.host.clone())?;
        // 465 = TLS implicito; cualquier otro puerto negocia STARTTLS.
        let tls = if config.port == 465 {
            Tls::Wrapper(tls_params)
        } else {
            Tls::Required(tls_params)
        };

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.pass.clone()))
            .tls(tls)
            .timeout(Some(SMTP_SEND_TIMEOUT))
            .build();

        log::info!(
            "(SmtpEmailChannel) Transporte SMTP listo en {}:{}",
            config.host,
            config.port
        );
        Ok(Self { from, mailer })
    }
}

#[async_trait]
impl EmailChannel for SmtpEmailChannel {
    async fn send_email(&self, address: &str, content: &EmailContent) -> Result<()> {
        let to: Mailbox = address.parse().context("Invalid recipient address")?;

        let body = MultiPart::alternative()
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(content.text.clone()),
            )
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(content.html.clone()),
            );

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&content.subject)
            .multipart(body)?;

        tokio::time::timeout(SMTP_SEND_TIMEOUT, self.mailer.send(message))
            .await
            .context("Timeout enviando email")??;

        log::info!("(send_email) Email '{}' enviado a {}", content.subject, address);
        Ok(())
    }
}
