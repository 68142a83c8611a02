//! services/sms_service.rs
//! Canal de mensajes cortos sobre un gateway HTTP de mensajeria.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::config::channel_config::SmsGatewayConfig;

#[async_trait]
pub trait ShortMessageChannel: Send + Sync {
    async fn send_short_message(&self, address: &str, body: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpSmsChannel {
    config: SmsGatewayConfig,
    http_client: Client,
}

impl HttpSmsChannel {
    pub fn new(config: SmsGatewayConfig) -> Self {
        Self {
            config,
            http_client: Client::new(),
        }
    }

    /// `{base}/{path}/{session}`, con el id de sesion escapado para la ruta.
    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path,
            urlencoding::encode(&self.config.session_id)
        )
    }

    /// La sesion del gateway debe estar en estado CONNECTED antes de enviar.
    async fn ensure_connected(&self) -> Result<()> {
        let status_url = self.endpoint("session/status");
        let resp = self
            .http_client
            .get(&status_url)
            .send()
            .await
            .context("Fallo al hacer GET session/status")?;

        if !resp.status().is_success() {
            let body_txt = resp.text().await.unwrap_or_default();
            log::error!(
                "(send_short_message) La respuesta NO es exitosa. body_txt='{}'",
                body_txt
            );
            return Err(anyhow!("Error consultando sesion: {}", body_txt));
        }

        let json_val = resp.json::<serde_json::Value>().await?;
        let connected = json_val
            .get("state")
            .and_then(|v| v.as_str())
            .map(|s| s == "CONNECTED")
            .unwrap_or(false);

        if !connected {
            return Err(anyhow!("Sesion del gateway no esta CONNECTED"));
        }
        Ok(())
    }
}

#[async_trait]
impl ShortMessageChannel for HttpSmsChannel {
    async fn send_short_message(&self, address: &str, body: &str) -> Result<()> {
        self.ensure_connected().await?;

        let send_url = self.endpoint("client/sendMessage");
        let payload = serde_json::json!({
            "chatId": address,
            "contentType": "string",
            "content": body
        });

        let r = self
            .http_client
            .post(&send_url)
            .json(&payload)
            .send()
            .await
            .context("(send_short_message) Fallo al POST sendMessage")?;

        if !r.status().is_success() {
            let e = r.text().await.unwrap_or_default();
            return Err(anyhow!("Fallo al enviar mensaje a '{}': {}", address, e));
        }

        log::info!("(send_short_message) Mensaje enviado a '{}'", address);
        Ok(())
    }
}
