//! # Instance Options
//!
//! Loader and validator for the instance configuration file. The format is
//! INI-flavored text: `key = value` lines, `#` or `;` comments, keys that
//! contain dots literally (`log.file.severity`). An optional `[section]`
//! header prefixes the keys that follow it with `section.`.
//!
//! Loading is all-or-nothing: every option is parsed and validated into a
//! temporary record and nothing is published until the whole file is
//! clean. Unset options fall back to the defaults in [`constants`];
//! out-of-range or malformed values fail with a configuration error
//! naming the offending option.
//!
//! ## Option groups
//!
//! - general: client ports, data directory, connection backlogs and
//!   maxima, the list of log channels
//! - `log.<name>.*`: per-channel type, destination, size/rotation/expiry
//!   limits, severity
//! - `iomgr.*`: worker and writer thread counts, the IO-manager's own
//!   ports (which must differ from the client ports), cache capacities
//! - `encryption.*`: default and system-database cipher ids
//! - `client.*`: connection encryption toggle and TLS material

pub mod constants;

use hashbrown::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::catalog::is_valid_object_name;
use crate::crypto::DEFAULT_CIPHER_ID;
use crate::error::{DbError, DbResult};
use constants::*;

/// Root of per-instance configuration directories.
pub const INSTANCE_CONFIG_ROOT: &str = "/etc/meridb/instances";

/// Name of the instance configuration file inside its directory.
pub const INSTANCE_CONFIG_FILE: &str = "config";

fn bad_option(message: impl Into<String>) -> DbError {
    DbError::InvalidConfigurationOption(message.into())
}

/// Log sink kind of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChannelType {
    Console,
    File,
}

/// Minimum severity a channel records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogSeverity {
    const NAMES: [(&'static str, LogSeverity); 6] = [
        ("trace", LogSeverity::Trace),
        ("debug", LogSeverity::Debug),
        ("info", LogSeverity::Info),
        ("warning", LogSeverity::Warning),
        ("error", LogSeverity::Error),
        ("fatal", LogSeverity::Fatal),
    ];

    /// Case-insensitive name lookup. An unknown name is an error; no
    /// severity is assigned on the error path.
    pub fn from_name(name: &str) -> Option<LogSeverity> {
        Self::NAMES
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|&(_, severity)| severity)
    }
}

#[derive(Debug, Clone)]
pub struct GeneralOptions {
    pub instance_name: String,
    pub ipv4_port: u16,
    pub ipv6_port: u16,
    pub data_directory: String,
    pub admin_connection_listener_backlog: u32,
    pub max_admin_connections: u32,
    pub user_connection_listener_backlog: u32,
    pub max_user_connections: u32,
}

#[derive(Debug, Clone)]
pub struct LogChannelOptions {
    pub name: String,
    pub channel_type: LogChannelType,
    pub destination: String,
    pub max_file_size: u64,
    pub max_files: u64,
    pub expiration_secs: u64,
    pub severity: LogSeverity,
}

#[derive(Debug, Clone)]
pub struct IoManagerOptions {
    pub worker_threads: u32,
    pub writer_threads: u32,
    pub ipv4_port: u16,
    pub ipv6_port: u16,
    pub block_cache_capacity: usize,
    pub user_cache_capacity: usize,
    pub database_cache_capacity: usize,
    pub table_cache_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct EncryptionOptions {
    pub default_cipher_id: String,
    pub system_db_cipher_id: String,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub enable_encryption: bool,
    pub tls_certificate: String,
    pub tls_certificate_chain: String,
    pub tls_private_key: String,
}

/// The validated options record seeding every database of an instance.
#[derive(Debug, Clone)]
pub struct InstanceOptions {
    pub general: GeneralOptions,
    pub log_channels: Vec<LogChannelOptions>,
    pub iomgr: IoManagerOptions,
    pub encryption: EncryptionOptions,
    pub client: ClientOptions,
}

impl InstanceOptions {
    /// Conventional path of an instance's configuration file.
    pub fn config_file_path(instance_name: &str) -> PathBuf {
        Path::new(INSTANCE_CONFIG_ROOT)
            .join(instance_name)
            .join(INSTANCE_CONFIG_FILE)
    }

    /// Loads and validates the configuration of a named instance from its
    /// conventional location.
    pub fn load(instance_name: &str) -> DbResult<InstanceOptions> {
        Self::load_from_file(instance_name, &Self::config_file_path(instance_name))
    }

    pub fn load_from_file(instance_name: &str, path: &Path) -> DbResult<InstanceOptions> {
        let text = std::fs::read_to_string(path)?;
        Self::load_from_str(instance_name, &text)
    }

    /// Parses and validates configuration text. Nothing is published
    /// unless every option is valid.
    pub fn load_from_str(instance_name: &str, text: &str) -> DbResult<InstanceOptions> {
        if !is_valid_object_name(instance_name) {
            return Err(bad_option(format!(
                "Invalid instance name '{instance_name}'"
            )));
        }
        let config = ConfigMap::parse(text)?;

        let general = Self::load_general(instance_name, &config)?;
        let log_channels = Self::load_log_channels(&config)?;
        let iomgr = Self::load_iomgr(&config, &general)?;
        let encryption = Self::load_encryption(&config);
        let client = Self::load_client(&config)?;

        Ok(InstanceOptions {
            general,
            log_channels,
            iomgr,
            encryption,
            client,
        })
    }

    fn load_general(instance_name: &str, config: &ConfigMap) -> DbResult<GeneralOptions> {
        let ipv4_port = config.get_port("ipv4_port", DEFAULT_IPV4_PORT, "IPv4 server")?;
        let ipv6_port = config.get_port("ipv6_port", DEFAULT_IPV6_PORT, "IPv6 server")?;
        if ipv4_port == 0 && ipv6_port == 0 {
            return Err(bad_option("Both IPv4 and IPv6 are disabled"));
        }

        let mut data_directory = config.get_trimmed("data_dir").unwrap_or_default();
        while data_directory.ends_with('/') {
            data_directory.pop();
        }
        if data_directory.is_empty() {
            return Err(bad_option("Data directory not specified or empty"));
        }

        let admin_connection_listener_backlog = config.get_u32(
            "admin_connection_listener_backlog",
            DEFAULT_ADMIN_CONNECTION_LISTENER_BACKLOG,
        )?;
        if !(1..=MAX_ADMIN_CONNECTION_LISTENER_BACKLOG)
            .contains(&admin_connection_listener_backlog)
        {
            return Err(bad_option(
                "Admin connection listener backlog value is out of range",
            ));
        }

        let max_admin_connections =
            config.get_u32("max_admin_connections", DEFAULT_MAX_ADMIN_CONNECTIONS)?;
        if !(1..=MAX_MAX_ADMIN_CONNECTIONS).contains(&max_admin_connections) {
            return Err(bad_option(
                "Max. number of admin connections is out of range",
            ));
        }

        let user_connection_listener_backlog = config.get_u32(
            "user_connection_listener_backlog",
            DEFAULT_USER_CONNECTION_LISTENER_BACKLOG,
        )?;
        if !(1..=MAX_USER_CONNECTION_LISTENER_BACKLOG).contains(&user_connection_listener_backlog)
        {
            return Err(bad_option(
                "User connection listener backlog value is out of range",
            ));
        }

        let max_user_connections =
            config.get_u32("max_user_connections", DEFAULT_MAX_USER_CONNECTIONS)?;
        if !(1..=MAX_MAX_USER_CONNECTIONS).contains(&max_user_connections) {
            return Err(bad_option(
                "Max. number of user connections is out of range",
            ));
        }

        Ok(GeneralOptions {
            instance_name: instance_name.to_owned(),
            ipv4_port,
            ipv6_port,
            data_directory,
            admin_connection_listener_backlog,
            max_admin_connections,
            user_connection_listener_backlog,
            max_user_connections,
        })
    }

    fn load_log_channels(config: &ConfigMap) -> DbResult<Vec<LogChannelOptions>> {
        let list = config.get_trimmed("log_channels").unwrap_or_default();
        let mut names = Vec::new();
        let mut known: HashSet<String> = HashSet::new();
        for raw in list.split(',') {
            let name = raw.trim();
            if name.is_empty() {
                return Err(bad_option("Empty log channel name detected"));
            }
            if !known.insert(name.to_owned()) {
                return Err(bad_option(format!("Duplicate log channel name {name}")));
            }
            names.push(name.to_owned());
        }
        if names.is_empty() {
            return Err(bad_option("No log channels defined"));
        }

        let mut channels = Vec::with_capacity(names.len());
        for name in names {
            channels.push(Self::load_log_channel(config, &name)?);
        }
        Ok(channels)
    }

    fn load_log_channel(config: &ConfigMap, name: &str) -> DbResult<LogChannelOptions> {
        let prefix = format!("log.{name}.");

        let channel_type = {
            let value = config
                .get_trimmed(&format!("{prefix}type"))
                .unwrap_or_default();
            match value.as_str() {
                "" => {
                    return Err(bad_option(format!(
                        "Type not defined for the log channel {name}"
                    )))
                }
                "console" => LogChannelType::Console,
                "file" => LogChannelType::File,
                other => {
                    return Err(bad_option(format!(
                        "Unsupported channel type '{other}' specified for the log channel {name}"
                    )))
                }
            }
        };

        let destination = config
            .get_trimmed(&format!("{prefix}destination"))
            .unwrap_or_default();
        if destination.is_empty() {
            return Err(bad_option(format!(
                "Destination not defined for the log channel {name}"
            )));
        }

        let max_file_size = Self::parse_size_option(
            config.get_trimmed(&format!("{prefix}max_file_size")),
            name,
        )?;

        let max_files = {
            let value = config
                .get_trimmed(&format!("{prefix}max_files"))
                .unwrap_or_else(|| DEFAULT_MAX_LOG_FILES.to_string());
            let max_files: u64 = value.parse().map_err(|_| {
                bad_option(format!(
                    "Invalid value of max. number of log files for the log channel {name}: not a number"
                ))
            })?;
            if max_files == 0 {
                return Err(bad_option(format!(
                    "Invalid value of max. number of log files for the log channel {name}: value is zero"
                )));
            }
            max_files
        };

        let expiration_secs = Self::parse_expiration_option(
            config.get_trimmed(&format!("{prefix}exp_time")),
            name,
        )?;

        let severity = {
            let value = config
                .get_trimmed(&format!("{prefix}severity"))
                .unwrap_or_else(|| "info".to_owned());
            LogSeverity::from_name(&value).ok_or_else(|| {
                bad_option(format!(
                    "Invalid log severity level for the log channel {name}"
                ))
            })?
        };

        Ok(LogChannelOptions {
            name: name.to_owned(),
            channel_type,
            destination,
            max_file_size,
            max_files,
            expiration_secs,
            severity,
        })
    }

    /// Size with optional K/M/G suffix; the default unit is megabytes.
    fn parse_size_option(value: Option<String>, channel: &str) -> DbResult<u64> {
        let mut option = match value {
            Some(option) => option,
            None => return Ok(DEFAULT_LOG_FILE_SIZE),
        };
        let err = |reason: &str| {
            bad_option(format!(
                "Invalid value of max. file size for the log channel {channel}: {reason}"
            ))
        };

        let mut multiplier = 0u64;
        if option.len() > 1 {
            multiplier = match option.as_bytes()[option.len() - 1] {
                b'k' | b'K' => BYTES_IN_KB,
                b'm' | b'M' => BYTES_IN_MB,
                b'g' | b'G' => BYTES_IN_GB,
                _ => 0,
            };
            if multiplier > 0 {
                option.pop();
            }
        }
        if multiplier == 0 {
            multiplier = BYTES_IN_MB;
        }

        let value: u64 = option.trim().parse().map_err(|_| err("not a number"))?;
        if value == 0 {
            return Err(err("value is zero"));
        }
        if value > MAX_LOG_FILE_SIZE / multiplier {
            return Err(err("value is too big"));
        }
        Ok(value * multiplier)
    }

    /// Expiration with optional s/m/h/d/w suffix; the default unit is days.
    fn parse_expiration_option(value: Option<String>, channel: &str) -> DbResult<u64> {
        let mut option = match value {
            Some(option) => option,
            None => return Ok(DEFAULT_LOG_FILE_EXPIRATION_SECS),
        };
        let err = |reason: &str| {
            bad_option(format!(
                "Invalid value of expiration time for the log channel {channel}: {reason}"
            ))
        };

        let mut multiplier: Option<u64> = None;
        if option.len() > 1 {
            multiplier = match option.as_bytes()[option.len() - 1] {
                b's' | b'S' => Some(1),
                b'm' | b'M' => Some(SECONDS_IN_MINUTE),
                b'h' | b'H' => Some(SECONDS_IN_HOUR),
                b'd' | b'D' => Some(SECONDS_IN_DAY),
                b'w' | b'W' => Some(SECONDS_IN_WEEK),
                _ => None,
            };
            if multiplier.is_some() {
                option.pop();
            }
        }
        let multiplier = multiplier.unwrap_or(SECONDS_IN_DAY);

        let value: u64 = option.trim().parse().map_err(|_| err("not a number"))?;
        if value > MAX_LOG_FILE_EXPIRATION_SECS / multiplier {
            return Err(err("value is too big"));
        }
        Ok(value * multiplier)
    }

    fn load_iomgr(config: &ConfigMap, general: &GeneralOptions) -> DbResult<IoManagerOptions> {
        let worker_threads =
            config.get_u32("iomgr.worker_threads", DEFAULT_IOMGR_WORKER_THREADS)?;
        if worker_threads < 1 {
            return Err(bad_option(
                "Number of IO Manager worker threads is out of range",
            ));
        }

        let writer_threads =
            config.get_u32("iomgr.writer_threads", DEFAULT_IOMGR_WRITER_THREADS)?;
        if writer_threads < 1 {
            return Err(bad_option(
                "Number of IO Manager writer threads is out of range",
            ));
        }

        let ipv4_port =
            config.get_port("iomgr.ipv4_port", DEFAULT_IOMGR_IPV4_PORT, "IO Manager IPv4")?;
        if ipv4_port != 0 && ipv4_port == general.ipv4_port {
            return Err(bad_option(
                "IO Manager and database use the same IPv4 port",
            ));
        }

        let ipv6_port =
            config.get_port("iomgr.ipv6_port", DEFAULT_IOMGR_IPV6_PORT, "IO Manager IPv6")?;
        if ipv6_port != 0 && ipv6_port == general.ipv6_port {
            return Err(bad_option(
                "IO Manager and database use the same IPv6 port",
            ));
        }

        if ipv4_port == 0 && ipv6_port == 0 {
            return Err(bad_option(
                "Both IPv4 and IPv6 are disabled for IO Manager",
            ));
        }

        let block_cache_capacity =
            config.get_usize("iomgr.block_cache_capacity", DEFAULT_BLOCK_CACHE_CAPACITY)?;
        if block_cache_capacity < MIN_BLOCK_CACHE_CAPACITY {
            return Err(bad_option("IO Manager block cache capacity is too small"));
        }

        let user_cache_capacity =
            config.get_usize("iomgr.user_cache_capacity", DEFAULT_USER_CACHE_CAPACITY)?;
        if user_cache_capacity < MIN_USER_CACHE_CAPACITY {
            return Err(bad_option("IO Manager user cache capacity is too small"));
        }

        let database_cache_capacity = config.get_usize(
            "iomgr.database_cache_capacity",
            DEFAULT_DATABASE_CACHE_CAPACITY,
        )?;
        if database_cache_capacity < MIN_DATABASE_CACHE_CAPACITY {
            return Err(bad_option(
                "IO Manager database cache capacity is too small",
            ));
        }

        let table_cache_capacity =
            config.get_usize("iomgr.table_cache_capacity", DEFAULT_TABLE_CACHE_CAPACITY)?;
        if table_cache_capacity < MIN_TABLE_CACHE_CAPACITY {
            return Err(bad_option("IO Manager table cache capacity is too small"));
        }

        Ok(IoManagerOptions {
            worker_threads,
            writer_threads,
            ipv4_port,
            ipv6_port,
            block_cache_capacity,
            user_cache_capacity,
            database_cache_capacity,
            table_cache_capacity,
        })
    }

    fn load_encryption(config: &ConfigMap) -> EncryptionOptions {
        let default_cipher_id = config
            .get_trimmed("encryption.default_cipher_id")
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_CIPHER_ID.to_owned());
        let system_db_cipher_id = config
            .get_trimmed("encryption.system_db_cipher_id")
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default_cipher_id.clone());
        EncryptionOptions {
            default_cipher_id,
            system_db_cipher_id,
        }
    }

    fn load_client(config: &ConfigMap) -> DbResult<ClientOptions> {
        let enable_encryption = config.get_bool("client.enable_encryption", true)?;

        let tls_certificate = config
            .get_trimmed("client.tls_certificate")
            .unwrap_or_default();
        let tls_certificate_chain = config
            .get_trimmed("client.tls_certificate_chain")
            .unwrap_or_default();
        let tls_private_key = config
            .get_trimmed("client.tls_private_key")
            .unwrap_or_default();

        if enable_encryption {
            // Either a certificate or a certificate chain satisfies the
            // requirement; both empty is the misconfiguration.
            if tls_certificate.is_empty() && tls_certificate_chain.is_empty() {
                return Err(bad_option(
                    "Client certificate or certificate chain must be set to create a TLS connection",
                ));
            }
            if tls_private_key.is_empty() {
                return Err(bad_option("Client TLS private key is empty"));
            }
        }

        Ok(ClientOptions {
            enable_encryption,
            tls_certificate,
            tls_certificate_chain,
            tls_private_key,
        })
    }
}

/// Flat key/value view of an INI-flavored configuration file.
struct ConfigMap {
    entries: HashMap<String, String>,
}

impl ConfigMap {
    fn parse(text: &str) -> DbResult<ConfigMap> {
        let mut entries = HashMap::new();
        let mut section_prefix = String::new();

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section_prefix = format!("{}.", section.trim());
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(bad_option(format!(
                    "Malformed configuration line {}: '{raw_line}'",
                    line_no + 1
                )));
            };
            let key = format!("{section_prefix}{}", key.trim());
            entries.insert(key, value.trim().to_owned());
        }

        Ok(ConfigMap { entries })
    }

    fn get_trimmed(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|value| value.trim().to_owned())
    }

    fn get_u32(&self, key: &str, default: u32) -> DbResult<u32> {
        match self.get_trimmed(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| bad_option(format!("Invalid value of option {key}"))),
        }
    }

    fn get_usize(&self, key: &str, default: usize) -> DbResult<usize> {
        match self.get_trimmed(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| bad_option(format!("Invalid value of option {key}"))),
        }
    }

    fn get_port(&self, key: &str, default: u16, what: &str) -> DbResult<u16> {
        let port: u32 = match self.get_trimmed(key) {
            None => default as u32,
            Some(value) => value
                .parse()
                .map_err(|_| bad_option(format!("Invalid {what} port number")))?,
        };
        if port != 0
            && !(MIN_PORT_NUMBER as u32..=MAX_PORT_NUMBER as u32).contains(&port)
        {
            return Err(bad_option(format!("Invalid {what} port number")));
        }
        Ok(port as u16)
    }

    /// Boolean accepting yes/no/true/false, case-insensitively.
    fn get_bool(&self, key: &str, default: bool) -> DbResult<bool> {
        match self.get_trimmed(key) {
            None => Ok(default),
            Some(value) => {
                if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") {
                    Ok(true)
                } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no") {
                    Ok(false)
                } else {
                    Err(bad_option(format!("Invalid value of option {key}")))
                }
            }
        }
    }
}
