use crate::html::{html_to_text, truncate_chars};
use docent_domain::error::{Error, Result};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;

/// Navigate to a URL and return the text a reader would see.
#[async_trait::async_trait]
pub trait Browser: Send + Sync {
    async fn fetch_visible_text(&self, url: &str) -> Result<String>;
}

/// [`Browser`] over plain HTTP GET with strict limits:
/// hard timeout, 5 redirects, a byte cap on the body, and a character cap
/// on the extracted text.
pub struct HttpBrowser {
    client: reqwest::Client,
    max_bytes: usize,
    max_text_chars: usize,
}

impl HttpBrowser {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            client,
            max_bytes: 5 * 1024 * 1024,
            max_text_chars: 250_000,
        })
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

#[async_trait::async_trait]
impl Browser for HttpBrowser {
    async fn fetch_visible_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, concat!("docent/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "text/html,application/xhtml+xml,text/plain;q=0.9,*/*;q=0.5")
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http(format!("GET {url} returned HTTP {}", status.as_u16())));
        }
        let ct = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        // Stream body with hard byte cap; a truncated page is still useful.
        let mut stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(from_reqwest)?;
            let room = self.max_bytes - buf.len();
            if chunk.len() >= room {
                buf.extend_from_slice(&chunk[..room]);
                tracing::debug!(url = %url, max_bytes = self.max_bytes, "page body truncated");
                break;
            }
            buf.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&buf);
        let text = if ct.contains("html") || (ct.is_empty() && body.trim_start().starts_with('<')) {
            html_to_text(&body, self.max_text_chars)
        } else if ct.starts_with("text/") || ct.contains("json") || ct.is_empty() {
            truncate_chars(&body, self.max_text_chars)
        } else {
            return Err(Error::Http(format!("{url} is not a text page ({ct})")));
        };

        tracing::debug!(url = %url, bytes = buf.len(), chars = text.chars().count(), "page fetched");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_is_an_error_not_a_panic() {
        let browser = HttpBrowser::new(Duration::from_millis(500)).unwrap();
        let result = browser.fetch_visible_text("http://127.0.0.1:9/").await;
        assert!(result.is_err());
    }
}
