/// Application name, used for the platform data-directory lookup.
pub const APP_NAME: &str = "causerie";

/// Default key under which the guest session document is persisted.
pub const DEFAULT_STORAGE_KEY: &str = "causerie-store";

/// Number of messages fetched per history page.
pub const HISTORY_PAGE_SIZE: u32 = 50;

/// Inactivity window after which a typing indicator clears (milliseconds).
pub const TYPING_TIMEOUT_MS: u64 = 3000;

/// Cadence at which the typing machine is polled for expiry (milliseconds).
pub const TYPING_POLL_MS: u64 = 250;

/// Interval between presence heartbeat republishes (seconds).
pub const PRESENCE_HEARTBEAT_SECS: u64 = 30;

/// Default maximum message length in characters.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;

/// Default maximum upload size in bytes (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default guest session lifetime (24 h).
pub const DEFAULT_SESSION_EXPIRY_SECS: u64 = 24 * 60 * 60;

/// Default simulated agent typing delay in milliseconds.
pub const DEFAULT_AGENT_TYPING_DELAY_MS: u64 = 800;

/// Upper bound for the agent typing delay.
pub const MAX_AGENT_TYPING_DELAY_MS: u64 = 5000;

/// Object-store bucket that receives chat uploads.
pub const UPLOAD_BUCKET: &str = "chat-files";
