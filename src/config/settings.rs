use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker listener, the channel timers and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub channel: ChannelSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the broker will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Timers and limits applied to every channel.
///
/// All intervals are milliseconds. An interval of zero disables the
/// corresponding housekeeping check.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// How long an unacknowledged message waits before it is resent.
    pub resend_interval_ms: i64,
    /// Outbound idle time after which a PINGREQ probe is queued.
    pub keep_alive_ms: i64,
    /// Inbound idle time after which the channel is closed as dead.
    pub max_silence_ms: i64,
    /// Largest frame, header included, the channel will accept.
    pub max_frame_bytes: usize,
    /// Size of the scratch buffer used for each socket read.
    pub read_buffer_bytes: usize,
}

impl ChannelSettings {
    /// Client-side settings for an MQTT keep-alive of `keep_alive_ms`:
    /// probe after the keep-alive and give up after one and a half of them.
    pub fn client(keep_alive_ms: i64) -> Self {
        Self {
            keep_alive_ms,
            max_silence_ms: keep_alive_ms + keep_alive_ms / 2,
            ..Self::default()
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            resend_interval_ms: 15_000,
            keep_alive_ms: 0,
            max_silence_ms: 0,
            max_frame_bytes: 256 * 1024 + 5,
            read_buffer_bytes: 8 * 1024,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub channel: Option<PartialChannelSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

/// Partial server settings.
#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Partial channel settings.
#[derive(Debug, Deserialize)]
pub struct PartialChannelSettings {
    pub resend_interval_ms: Option<i64>,
    pub keep_alive_ms: Option<i64>,
    pub max_silence_ms: Option<i64>,
    pub max_frame_bytes: Option<usize>,
    pub read_buffer_bytes: Option<usize>,
}

/// Partial logging settings.
#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 1883,
            },
            channel: ChannelSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
