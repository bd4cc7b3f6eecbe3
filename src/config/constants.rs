//! # Instance Configuration Constants
//!
//! Defaults, minimums and maximums for every recognized instance option,
//! grouped by functional area. Validation in the options loader compares
//! against these values; keeping them in one place prevents the loader and
//! its tests from drifting apart.
//!
//! ## Interdependencies
//!
//! - `DEFAULT_LOG_FILE_SIZE` must not exceed `MAX_LOG_FILE_SIZE`, or a
//!   configuration with no explicit size would fail its own validation.
//! - `DEFAULT_LOG_FILE_EXPIRATION_SECS` must not exceed
//!   `MAX_LOG_FILE_EXPIRATION_SECS` for the same reason.
//! - Cache capacity defaults must be at least their per-kind minimums.
//!
//! These are enforced by compile-time assertions below.

// ============================================================================
// NETWORK PORTS
// ============================================================================

/// Lowest non-privileged port a listener may bind.
pub const MIN_PORT_NUMBER: u16 = 1024;

/// Highest valid TCP port.
pub const MAX_PORT_NUMBER: u16 = 65535;

/// Default IPv4 client port. Zero disables a listener.
pub const DEFAULT_IPV4_PORT: u16 = 50000;

/// Default IPv6 client port. Disabled unless configured.
pub const DEFAULT_IPV6_PORT: u16 = 0;

/// Default IO-manager IPv4 port; must differ from the client ports.
pub const DEFAULT_IOMGR_IPV4_PORT: u16 = 50001;

/// Default IO-manager IPv6 port. Disabled unless configured.
pub const DEFAULT_IOMGR_IPV6_PORT: u16 = 0;

// ============================================================================
// CONNECTIONS
// ============================================================================

pub const DEFAULT_ADMIN_CONNECTION_LISTENER_BACKLOG: u32 = 10;
pub const MAX_ADMIN_CONNECTION_LISTENER_BACKLOG: u32 = 10;

pub const DEFAULT_MAX_ADMIN_CONNECTIONS: u32 = 10;
pub const MAX_MAX_ADMIN_CONNECTIONS: u32 = 100;

pub const DEFAULT_USER_CONNECTION_LISTENER_BACKLOG: u32 = 10;
pub const MAX_USER_CONNECTION_LISTENER_BACKLOG: u32 = 32768;

pub const DEFAULT_MAX_USER_CONNECTIONS: u32 = 100;
pub const MAX_MAX_USER_CONNECTIONS: u32 = 32768;

// ============================================================================
// LOG CHANNELS
// ============================================================================

pub const BYTES_IN_KB: u64 = 1024;
pub const BYTES_IN_MB: u64 = 1024 * 1024;
pub const BYTES_IN_GB: u64 = 1024 * 1024 * 1024;

pub const SECONDS_IN_MINUTE: u64 = 60;
pub const SECONDS_IN_HOUR: u64 = 3600;
pub const SECONDS_IN_DAY: u64 = 86400;
pub const SECONDS_IN_WEEK: u64 = 7 * SECONDS_IN_DAY;

/// Default per-file size cap when `max_file_size` is not set (10 MiB).
pub const DEFAULT_LOG_FILE_SIZE: u64 = 10 * BYTES_IN_MB;

/// Upper bound for `max_file_size` (16 GiB).
pub const MAX_LOG_FILE_SIZE: u64 = 16 * BYTES_IN_GB;

/// Default number of rotated files kept per channel.
pub const DEFAULT_MAX_LOG_FILES: u64 = 10;

/// Default log file expiration when `exp_time` is not set (30 days).
pub const DEFAULT_LOG_FILE_EXPIRATION_SECS: u64 = 30 * SECONDS_IN_DAY;

/// Upper bound for `exp_time` (two years).
pub const MAX_LOG_FILE_EXPIRATION_SECS: u64 = 2 * 365 * SECONDS_IN_DAY;

const _: () = assert!(
    DEFAULT_LOG_FILE_SIZE <= MAX_LOG_FILE_SIZE,
    "default log file size exceeds its own maximum"
);

const _: () = assert!(
    DEFAULT_LOG_FILE_EXPIRATION_SECS <= MAX_LOG_FILE_EXPIRATION_SECS,
    "default log expiration exceeds its own maximum"
);

// ============================================================================
// IO-MANAGER WORKERS
// ============================================================================

pub const DEFAULT_IOMGR_WORKER_THREADS: u32 = 2;
pub const DEFAULT_IOMGR_WRITER_THREADS: u32 = 2;

// ============================================================================
// CACHE CAPACITIES
// Per-kind minimums are enforced at configuration load, not at cache
// construction, so a bad value is rejected before any database exists.
// ============================================================================

pub const MIN_BLOCK_CACHE_CAPACITY: usize = 32;
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 103;

pub const MIN_USER_CACHE_CAPACITY: usize = 2;
pub const DEFAULT_USER_CACHE_CAPACITY: usize = 100;

pub const MIN_DATABASE_CACHE_CAPACITY: usize = 2;
pub const DEFAULT_DATABASE_CACHE_CAPACITY: usize = 100;

pub const MIN_TABLE_CACHE_CAPACITY: usize = 16;
pub const DEFAULT_TABLE_CACHE_CAPACITY: usize = 100;

/// Capacity of the per-database constraint-definition cache. Not
/// user-configurable; definitions are small and heavily shared.
pub const CONSTRAINT_DEFINITION_CACHE_CAPACITY: usize = 256;

const _: () = assert!(DEFAULT_BLOCK_CACHE_CAPACITY >= MIN_BLOCK_CACHE_CAPACITY);
const _: () = assert!(DEFAULT_USER_CACHE_CAPACITY >= MIN_USER_CACHE_CAPACITY);
const _: () = assert!(DEFAULT_DATABASE_CACHE_CAPACITY >= MIN_DATABASE_CACHE_CAPACITY);
const _: () = assert!(DEFAULT_TABLE_CACHE_CAPACITY >= MIN_TABLE_CACHE_CAPACITY);
