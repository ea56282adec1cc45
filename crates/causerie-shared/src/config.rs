//! Widget configuration.
//!
//! All settings have defaults so the widget can be embedded with nothing but
//! a service URL and key. `from_env` fills those two from the environment
//! for quick local setups.

use std::time::Duration;

use crate::constants::{
    DEFAULT_AGENT_TYPING_DELAY_MS, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_MESSAGE_LENGTH,
    DEFAULT_SESSION_EXPIRY_SECS, DEFAULT_STORAGE_KEY, MAX_AGENT_TYPING_DELAY_MS,
};
use crate::error::ValidationError;
use crate::models::Attachment;

/// Widget configuration.
#[derive(Debug, Clone)]
pub struct WidgetConfig {
    /// Base URL of the hosted backend (row store + change feed).
    /// Env: `CAUSERIE_SERVICE_URL`
    pub service_url: String,

    /// Publishable API key for the hosted backend.
    /// Env: `CAUSERIE_SERVICE_KEY`
    pub service_key: String,

    /// Key under which the guest session document is persisted.
    pub storage_key: String,

    /// Hard limit on draft length, in characters. Longer input is truncated.
    pub max_message_length: usize,

    /// Simulated agent typing delay in milliseconds (clamped to 0–5000).
    pub agent_typing_delay_ms: u64,

    /// Lock the input after a visitor send until an admin reply arrives.
    pub input_locked_after_send: bool,

    pub enable_uploads: bool,
    pub enable_emojis: bool,
    pub enable_presence: bool,
    pub auto_assign_admin: bool,

    /// Maximum upload size in bytes.
    pub max_file_size: u64,

    /// Accepted MIME patterns; `*` wildcards the subtype (e.g. `image/*`).
    pub allowed_file_types: Vec<String>,

    /// Guest session lifetime before a fresh identity is minted.
    pub guest_session_expiry: Duration,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            service_key: String::new(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            agent_typing_delay_ms: DEFAULT_AGENT_TYPING_DELAY_MS,
            input_locked_after_send: true,
            enable_uploads: true,
            enable_emojis: true,
            enable_presence: true,
            auto_assign_admin: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_file_types: vec![
                "image/*".to_string(),
                "application/pdf".to_string(),
                "text/*".to_string(),
            ],
            guest_session_expiry: Duration::from_secs(DEFAULT_SESSION_EXPIRY_SECS),
        }
    }
}

impl WidgetConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CAUSERIE_SERVICE_URL") {
            config.service_url = url;
        }

        if let Ok(key) = std::env::var("CAUSERIE_SERVICE_KEY") {
            config.service_key = key;
        }

        if let Ok(val) = std::env::var("CAUSERIE_STORAGE_KEY") {
            if !val.is_empty() {
                config.storage_key = val;
            }
        }

        config
    }

    /// Clamp out-of-range settings into their documented bounds.
    pub fn validate(mut self) -> Self {
        if self.agent_typing_delay_ms > MAX_AGENT_TYPING_DELAY_MS {
            tracing::warn!(
                value = self.agent_typing_delay_ms,
                max = MAX_AGENT_TYPING_DELAY_MS,
                "agent_typing_delay_ms out of range, clamping"
            );
            self.agent_typing_delay_ms = MAX_AGENT_TYPING_DELAY_MS;
        }
        self
    }

    /// Truncate a draft to `max_message_length` characters.
    pub fn clamp_draft(&self, draft: &str) -> String {
        if draft.chars().count() > self.max_message_length {
            draft.chars().take(self.max_message_length).collect()
        } else {
            draft.to_string()
        }
    }

    /// Check an attachment against the upload size and type policy.
    pub fn permits_attachment(&self, attachment: &Attachment) -> Result<(), ValidationError> {
        if attachment.size() > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size: attachment.size(),
                max: self.max_file_size,
            });
        }
        if !self.allowed_file_types.is_empty()
            && !self
                .allowed_file_types
                .iter()
                .any(|pattern| mime_matches(pattern, &attachment.mime_type))
        {
            return Err(ValidationError::FileTypeNotAllowed(
                attachment.mime_type.clone(),
            ));
        }
        Ok(())
    }
}

/// Match a MIME type against a pattern where `*` wildcards the subtype.
fn mime_matches(pattern: &str, mime: &str) -> bool {
    match pattern.split_once('/') {
        Some((kind, "*")) => mime.split_once('/').map(|(m, _)| m) == Some(kind),
        _ => pattern == mime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(mime: &str, len: usize) -> Attachment {
        Attachment {
            name: "file.bin".to_string(),
            mime_type: mime.to_string(),
            bytes: vec![0u8; len],
        }
    }

    #[test]
    fn test_defaults() {
        let config = WidgetConfig::default();
        assert_eq!(config.max_message_length, 2000);
        assert_eq!(config.agent_typing_delay_ms, 800);
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert!(config.input_locked_after_send);
        assert_eq!(config.guest_session_expiry, Duration::from_secs(86_400));
    }

    #[test]
    fn test_validate_clamps_agent_delay() {
        let config = WidgetConfig {
            agent_typing_delay_ms: 9000,
            ..Default::default()
        };
        assert_eq!(config.validate().agent_typing_delay_ms, 5000);
    }

    #[test]
    fn test_clamp_draft_truncates_to_limit() {
        let config = WidgetConfig::default();
        let draft: String = "x".repeat(2050);
        assert_eq!(config.clamp_draft(&draft).chars().count(), 2000);
    }

    #[test]
    fn test_clamp_draft_leaves_short_input() {
        let config = WidgetConfig::default();
        assert_eq!(config.clamp_draft("bonjour"), "bonjour");
    }

    #[test]
    fn test_permits_attachment_size() {
        let config = WidgetConfig {
            max_file_size: 16,
            ..Default::default()
        };
        assert!(config.permits_attachment(&attachment("image/png", 16)).is_ok());
        assert!(matches!(
            config.permits_attachment(&attachment("image/png", 17)),
            Err(ValidationError::FileTooLarge { size: 17, max: 16 })
        ));
    }

    #[test]
    fn test_permits_attachment_type() {
        let config = WidgetConfig::default();
        assert!(config.permits_attachment(&attachment("image/webp", 8)).is_ok());
        assert!(config
            .permits_attachment(&attachment("application/pdf", 8))
            .is_ok());
        assert!(matches!(
            config.permits_attachment(&attachment("video/mp4", 8)),
            Err(ValidationError::FileTypeNotAllowed(_))
        ));
    }

    #[test]
    fn test_mime_matches() {
        assert!(mime_matches("image/*", "image/png"));
        assert!(mime_matches("application/pdf", "application/pdf"));
        assert!(!mime_matches("image/*", "text/plain"));
        assert!(!mime_matches("application/pdf", "application/json"));
    }
}
