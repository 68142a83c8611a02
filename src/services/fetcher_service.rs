//! services/fetcher_service.rs
//! Descarga del markup de un objetivo, con timeout y reintentos propios.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;

use crate::config::monitor_config::MonitorConfig;

/// Datos de diagnostico de una consulta exitosa (se guardan como JSON junto al snapshot).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchDiagnostics {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub status_code: u16,
    pub content_length: usize,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub markup: String,
    pub diagnostics: FetchDiagnostics,
}

/// Cualquier `Err` se interpreta como "saltar este tick".
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    http_client: Client,
    retries: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("No se pudo construir el cliente HTTP del fetcher")?;

        Ok(Self {
            http_client,
            retries: config.fetch_retries.max(1),
            retry_delay: config.fetch_retry_delay,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<(u16, String)> {
        let resp = self
            .http_client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Fallo GET {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            // Una pagina de error nunca debe quedar como snapshot.
            return Err(anyhow!("GET {} devolvio status={}", url, status));
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("No se pudo leer el cuerpo de {}", url))?;
        Ok((status.as_u16(), body))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        let started = Instant::now();
        let mut last_err = anyhow!("(fetch) sin intentos para {}", url);

        for attempt in 1..=self.retries {
            match self.fetch_once(url).await {
                Ok((status_code, markup)) => {
                    let diagnostics = FetchDiagnostics {
                        timestamp: Utc::now(),
                        url: url.to_string(),
                        status_code,
                        content_length: markup.len(),
                        attempts: attempt,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    log::debug!(
                        "(fetch) {} -> {} bytes en {} ms (intento {})",
                        url,
                        diagnostics.content_length,
                        diagnostics.elapsed_ms,
                        attempt
                    );
                    return Ok(FetchOutcome {
                        markup,
                        diagnostics,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "(fetch) Intento {}/{} fallido para {}: {:?}",
                        attempt,
                        self.retries,
                        url,
                        e
                    );
                    last_err = e;
                    if attempt < self.retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(last_err.context(format!(
            "(fetch) {} fallo tras {} intentos",
            url, self.retries
        )))
    }
}
