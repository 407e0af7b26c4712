mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{ChannelSettings, LoggingSettings, ServerSettings, Settings};

/// Loads the configuration from the default file and environment variables
/// (`MQTT_CHANNEL__KEEP_ALIVE_MS=30000` sets `channel.keep_alive_ms`)
/// Merges the configuration with default values
/// Returns a `Settings` struct containing the server, channel and logging configurations
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("MQTT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let channel = partial.channel.as_ref();
    Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        channel: ChannelSettings {
            resend_interval_ms: channel
                .and_then(|c| c.resend_interval_ms)
                .unwrap_or(default.channel.resend_interval_ms),
            keep_alive_ms: channel
                .and_then(|c| c.keep_alive_ms)
                .unwrap_or(default.channel.keep_alive_ms),
            max_silence_ms: channel
                .and_then(|c| c.max_silence_ms)
                .unwrap_or(default.channel.max_silence_ms),
            max_frame_bytes: channel
                .and_then(|c| c.max_frame_bytes)
                .unwrap_or(default.channel.max_frame_bytes),
            read_buffer_bytes: channel
                .and_then(|c| c.read_buffer_bytes)
                .unwrap_or(default.channel.read_buffer_bytes),
        },
        logging: LoggingSettings {
            level: partial
                .logging
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.logging.level),
        },
    }
}
