// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;
pub const API_VERSION_PATH: &str = "v1";
pub const COLLABORATION_PATH: &str = "collaboration";

// Connection write path
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

// Cleanup sweeper
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 300;

// Heartbeat cadence expected from clients. A session that misses
// DEFAULT_MISSED_HEARTBEATS in a row is reported idle, not evicted.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MISSED_HEARTBEATS: u32 = 3;

// Per-document audit log
pub const DEFAULT_MESSAGE_LOG_CAPACITY: usize = 1000;
pub const DEFAULT_RECENT_MESSAGES_LIMIT: usize = 50;

// Sync Service client
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 10;

// Reported in ConnectionStats; all connections live in one in-process registry
pub const REGISTRY_SHARD_COUNT: u32 = 1;
