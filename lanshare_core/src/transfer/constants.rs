use std::time::Duration;

/// Chunk size for socket/file copies (16MB)
pub const BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Maximum file name length accepted from a peer
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Name used when a peer sends nothing usable
pub const FALLBACK_FILE_NAME: &str = "unknown_file";

/// Pause after a failed `accept` (e.g. out of file descriptors) before retrying
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
