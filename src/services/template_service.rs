//! services/template_service.rs
//! Textos de alerta, bienvenida y resumen (email y mensaje corto).

use chrono::{DateTime, Utc};

use crate::services::classifier_service::TokenDiff;

/// Cuantas palabras agregadas/quitadas se muestran en el cuerpo de una alerta.
pub const ALERT_TOKEN_LIMIT: usize = 10;

const WELCOME_SUBJECT: &str = "WEB ALERT: MONITORING STARTED";
const SUMMARY_SUBJECT: &str = "WEB ALERT: MONITORING ENDED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Mensaje ya renderizado para ambos canales.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub email: EmailContent,
    pub short_message: String,
}

#[derive(Debug, Clone)]
pub struct SummaryFacts {
    pub duration_minutes: i64,
    pub check_count: i64,
    pub change_count: i64,
    pub last_check: Option<DateTime<Utc>>,
}

fn fmt_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn token_list(tokens: &[String]) -> String {
    let shown: Vec<&str> = tokens
        .iter()
        .take(ALERT_TOKEN_LIMIT)
        .map(String::as_str)
        .collect();
    let mut out = shown.join(", ");
    if tokens.len() > ALERT_TOKEN_LIMIT {
        out.push_str("...");
    }
    out
}

pub fn render_alert(
    subject: &str,
    url: &str,
    detected_at: DateTime<Utc>,
    diff: &TokenDiff,
) -> RenderedMessage {
    let when = fmt_time(detected_at);

    let mut text = format!(
        "HI,\n\nChange detected on webpage: {}\nDate and time: {}\n",
        url, when
    );
    let mut changes_html = String::new();
    if !diff.added.is_empty() {
        text.push_str(&format!("\nAdded: {}", token_list(&diff.added)));
        changes_html.push_str(&format!(
            "<p><strong>Added:</strong> {}</p>",
            escape_html(&token_list(&diff.added))
        ));
    }
    if !diff.removed.is_empty() {
        text.push_str(&format!("\nRemoved: {}", token_list(&diff.removed)));
        changes_html.push_str(&format!(
            "<p><strong>Removed:</strong> {}</p>",
            escape_html(&token_list(&diff.removed))
        ));
    }

    let html = format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
         <h1 style=\"color: #dc3545;\">{subject}</h1>\
         <p><strong>Change detected on webpage:</strong> <a href=\"{url}\">{url}</a></p>\
         <p><strong>Date and time:</strong> {when}</p>{changes}</div>",
        subject = escape_html(subject),
        url = escape_html(url),
        when = when,
        changes = changes_html,
    );

    RenderedMessage {
        email: EmailContent {
            subject: subject.to_string(),
            text,
            html,
        },
        short_message: format!("{}: change detected on {} at {}", subject, url, when),
    }
}

pub fn render_welcome(
    url: &str,
    poll_interval_minutes: i64,
    duration_minutes: i64,
    started_at: DateTime<Utc>,
) -> RenderedMessage {
    let text = format!(
        "Web Alerts Activated\n\nURL: {}\nPoll period: every {} minute(s)\nDuration: {} minutes\n\n\
         Monitoring has started. You will be notified if any changes are detected.",
        url, poll_interval_minutes, duration_minutes
    );
    let html = format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
         <h2>Web Alerts Activated</h2>\
         <p><strong>URL:</strong> <a href=\"{url}\">{url}</a></p>\
         <p><strong>Poll period:</strong> every {interval} minute(s)</p>\
         <p><strong>Duration:</strong> {duration} minutes</p>\
         <p><strong>Start time:</strong> {start}</p>\
         <p>Monitoring will stop automatically after {duration} minutes.</p></div>",
        url = escape_html(url),
        interval = poll_interval_minutes,
        duration = duration_minutes,
        start = fmt_time(started_at),
    );

    RenderedMessage {
        email: EmailContent {
            subject: WELCOME_SUBJECT.to_string(),
            text,
            html,
        },
        short_message: format!(
            "Web Alert: monitoring {} every {} min for {} min.",
            url, poll_interval_minutes, duration_minutes
        ),
    }
}

pub fn render_summary(url: &str, facts: &SummaryFacts) -> RenderedMessage {
    let verdict = if facts.change_count > 0 {
        format!(
            "We detected {} change(s) during monitoring.",
            facts.change_count
        )
    } else {
        "No changes were detected during monitoring.".to_string()
    };
    let last_check = facts
        .last_check
        .map(fmt_time)
        .unwrap_or_else(|| "N/A".to_string());

    let text = format!(
        "Monitoring completed for {}. {} Total checks: {}. Last check: {}",
        url, verdict, facts.check_count, last_check
    );
    let html = format!(
        "<h2>Monitoring Summary</h2>\
         <p><strong>Website:</strong> <a href=\"{url}\">{url}</a></p>\
         <p><strong>Duration:</strong> {duration} minutes</p>\
         <p><strong>Total checks:</strong> {checks}</p>\
         <p><strong>Changes detected:</strong> {changes}</p>\
         <p><strong>Last check:</strong> {last}</p><hr><p>{verdict}</p>",
        url = escape_html(url),
        duration = facts.duration_minutes,
        checks = facts.check_count,
        changes = facts.change_count,
        last = last_check,
        verdict = verdict,
    );

    RenderedMessage {
        email: EmailContent {
            subject: SUMMARY_SUBJECT.to_string(),
            text,
            html,
        },
        short_message: format!(
            "Web Alert ended for {}: {} checks, {} change(s).",
            url, facts.check_count, facts.change_count
        ),
    }
}
