//! Upload destinations: the sink interface, the Discord webhook sink and the
//! webhook config file loader.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;

/// Delivers a finished clip to one destination.
pub trait UploadSink: Send + Sync {
    fn upload(&self, file: &Path, destination: &str, title: Option<&str>) -> Result<(), AppError>;
}

/// Posts the clip as a multipart `file` to a Discord webhook URL, with the title as bold content.
#[derive(Debug, Clone)]
pub struct DiscordWebhookSink {
    timeout: Duration,
}

impl DiscordWebhookSink {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for DiscordWebhookSink {
    fn default() -> Self {
        Self::new(UPLOAD_TIMEOUT)
    }
}

/// Discord message body for an optional clip title.
pub fn message_content(title: Option<&str>) -> Option<String> {
    title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| format!("**{}**", t))
}

fn status_error(status: u16) -> AppError {
    if status == HTTP_PAYLOAD_TOO_LARGE {
        AppError::Upload("File too large for Discord".to_string())
    } else {
        AppError::Upload(format!("Webhook returned HTTP {}", status))
    }
}

/// Shortened URL for logs; webhook URLs embed their token.
fn redact(url: &str) -> String {
    url.chars().take(30).collect::<String>() + "..."
}

impl UploadSink for DiscordWebhookSink {
    fn upload(&self, file: &Path, destination: &str, title: Option<&str>) -> Result<(), AppError> {
        if destination.trim().is_empty() {
            return Err(AppError::Upload("Webhook URL is required".to_string()));
        }
        let size = fs::metadata(file)?.len();
        log::info!(
            target: "clipdrop::upload",
            "Sending {} ({:.2} MB) to {}",
            file.display(),
            size as f64 / (1024.0 * 1024.0),
            redact(destination)
        );

        let mut form = reqwest::blocking::multipart::Form::new().file("file", file)?;
        if let Some(content) = message_content(title) {
            form = form.text("content", content);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AppError::Upload(format!("Failed to build HTTP client: {}", e)))?;
        let response = client
            .post(destination)
            .multipart(form)
            .send()
            .map_err(|e| AppError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let err = status_error(status.as_u16());
            log::error!(target: "clipdrop::upload", "{}", err);
            return Err(err);
        }
        log::info!(
            target: "clipdrop::upload",
            "Sent to {} (HTTP {})",
            redact(destination),
            status.as_u16()
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    url: String,
    #[serde(default)]
    checked: bool,
}

/// URLs of the checked entries in a `{ name: { "url", "checked" } }` file. Missing or
/// unreadable files yield no destinations.
pub fn load_enabled_webhooks(path: &Path) -> Vec<String> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) => {
            log::debug!(
                target: "clipdrop::upload",
                "No webhooks loaded from {}: {}",
                path.display(),
                e
            );
            return Vec::new();
        }
    };
    match serde_json::from_str::<BTreeMap<String, WebhookEntry>>(&json) {
        Ok(entries) => entries
            .into_values()
            .filter(|e| e.checked && !e.url.trim().is_empty())
            .map(|e| e.url)
            .collect(),
        Err(e) => {
            log::error!(
                target: "clipdrop::upload",
                "Error loading webhooks from {}: {}",
                path.display(),
                e
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_only_checked_webhooks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webhooks.json");
        fs::write(
            &path,
            r#"{
                "friends": { "url": "https://discord.com/api/webhooks/1/a", "checked": true },
                "work": { "url": "https://discord.com/api/webhooks/2/b", "checked": false },
                "legacy": { "url": "https://discord.com/api/webhooks/3/c" }
            }"#,
        )
        .unwrap();
        assert_eq!(
            load_enabled_webhooks(&path),
            vec!["https://discord.com/api/webhooks/1/a".to_string()]
        );
    }

    #[test]
    fn missing_or_malformed_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_enabled_webhooks(&dir.path().join("absent.json")).is_empty());
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "[1, 2, 3]").unwrap();
        assert!(load_enabled_webhooks(&bad).is_empty());
    }

    #[test]
    fn title_becomes_bold_content() {
        assert_eq!(message_content(Some("Clutch")), Some("**Clutch**".to_string()));
        assert_eq!(message_content(Some("   ")), None);
        assert_eq!(message_content(None), None);
    }

    #[test]
    fn payload_too_large_has_its_own_message() {
        assert_eq!(
            status_error(413).to_string(),
            "Upload failed: File too large for Discord"
        );
        assert_eq!(status_error(500).to_string(), "Upload failed: Webhook returned HTTP 500");
    }

    #[test]
    fn empty_destination_rejected_before_reading_file() {
        let sink = DiscordWebhookSink::default();
        let err = sink
            .upload(Path::new("/nonexistent.mp4"), " ", None)
            .unwrap_err();
        assert!(matches!(err, AppError::Upload(_)));
    }

    #[test]
    fn redact_keeps_prefix_only() {
        let url = "https://discord.com/api/webhooks/123456/secret-token";
        let shown = redact(url);
        assert!(!shown.contains("secret-token"));
        assert!(shown.ends_with("..."));
    }
}
