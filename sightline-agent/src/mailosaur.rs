//! Minimal Mailosaur client for the `check_email` tool.
use serde::Deserialize;
use serde_json::json;
use sightline_common::MailosaurConfig;
use sightline_http::{Auth, HttpClient, HttpError, RequestOpts};
use std::borrow::Cow;
use std::time::Duration;

const AWAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmailMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Vec<Address>,
    #[serde(default)]
    pub to: Vec<Address>,
    #[serde(default)]
    pub received: Option<String>,
    #[serde(default)]
    pub html: Option<Body>,
    #[serde(default)]
    pub text: Option<Body>,
}

impl EmailMessage {
    /// HTML body, or the text body wrapped in `<pre>`.
    pub fn html_document(&self) -> String {
        if let Some(html) = self.html.as_ref().and_then(|b| b.body.clone()) {
            return html;
        }
        let text = self
            .text
            .as_ref()
            .and_then(|b| b.body.clone())
            .unwrap_or_default()
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        format!("<html><body><pre>{text}</pre></body></html>")
    }

    pub fn summary(&self) -> String {
        let from = self
            .from
            .iter()
            .filter_map(|a| a.email.as_deref())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "From: {from}\nSubject: {}\nReceived: {}",
            self.subject.as_deref().unwrap_or("(no subject)"),
            self.received.as_deref().unwrap_or("unknown"),
        )
    }
}

pub struct MailosaurClient {
    http: HttpClient,
    api_key: String,
    server_id: String,
}

impl MailosaurClient {
    pub fn new(config: &MailosaurConfig) -> Result<Self, HttpError> {
        let http = HttpClient::new(&config.endpoint)?
            .with_timeout(AWAIT_TIMEOUT + Duration::from_secs(5))
            .with_retries(1);
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            server_id: config.server_id.clone(),
        })
    }

    /// Wait for the newest message sent to `email`.
    pub async fn await_message(&self, email: &str) -> Result<EmailMessage, HttpError> {
        let opts = RequestOpts {
            auth: Some(Auth::Basic {
                username: &self.api_key,
                password: None,
            }),
            query: Some(vec![
                ("server", Cow::Borrowed(self.server_id.as_str())),
                ("timeout", Cow::Owned(AWAIT_TIMEOUT.as_millis().to_string())),
            ]),
            ..Default::default()
        };
        let msg: EmailMessage = self
            .http
            .post_json("api/messages/await", &json!({ "sentTo": email }), opts)
            .await?;
        tracing::info!(
            to = email,
            subject = msg.subject.as_deref().unwrap_or_default(),
            "agent.mailosaur.received"
        );
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_bodies_are_escaped_into_html() {
        let msg = EmailMessage {
            text: Some(Body {
                body: Some("code <1234>".into()),
            }),
            ..EmailMessage::default()
        };
        assert!(msg.html_document().contains("code &lt;1234&gt;"));
        assert!(msg.summary().contains("(no subject)"));
    }
}
