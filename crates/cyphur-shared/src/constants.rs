/// Protocol version tag carried in every wire frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Application name.
pub const APP_NAME: &str = "Cyphur";

/// Maximum messages retained per conversation (oldest evicted past this).
pub const MESSAGE_HISTORY_CAP: usize = 500;

/// Maximum records retained in the interception log ring buffer.
pub const INTERCEPTION_CAP: usize = 1000;

/// Seconds after which an unrefreshed typing signal is considered stale.
pub const TYPING_TIMEOUT_SECS: i64 = 5;

/// Maximum message content length in characters.
pub const MAX_CONTENT_CHARS: usize = 8192;

/// Separator used to build the order-independent private-conversation key.
pub const PRIVATE_KEY_SEPARATOR: char = '|';

/// Named blobs in the host config store.
pub const BLOB_CONVERSATIONS: &str = "cyphur.conversations";
pub const BLOB_UNREAD: &str = "cyphur.unread";
pub const BLOB_FAVORITES: &str = "cyphur.favorites";
pub const BLOB_MUTES: &str = "cyphur.mutes";
pub const BLOB_PINS: &str = "cyphur.pins";
pub const BLOB_BACKGROUNDS: &str = "cyphur.backgrounds";
