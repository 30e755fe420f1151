use clap::Parser;
use std::time::Duration;

use crate::connection::ChannelSettings;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the conversation REST API.
    #[arg(long, env = "API_BASE_URL", default_value = "http://127.0.0.1:4000/api")]
    pub api_base_url: String,

    /// Base URL of the realtime chat channel endpoint.
    #[arg(long, env = "WS_BASE_URL", default_value = "ws://127.0.0.1:4000/chat")]
    pub ws_base_url: String,

    /// Tenant (website) id the conversation belongs to.
    #[arg(long, env = "WEBSITE_ID", default_value = "default")]
    pub website_id: String,

    /// Conversation to attach to.
    #[arg(long, env = "CONVERSATION_ID")]
    pub conversation_id: String,

    /// Local role (customer, owner, rider).
    #[arg(long, env = "CHAT_ROLE", default_value = "customer")]
    pub role: String,

    /// Local user id. A random one is generated when left empty.
    #[arg(long, env = "USER_ID", default_value = "")]
    pub user_id: String,

    /// Display name sent with uploads.
    #[arg(long, env = "USER_NAME", default_value = "guest")]
    pub user_name: String,

    /// Seconds between heartbeat pings while the channel is open.
    #[arg(long, env = "HEARTBEAT_SECS", default_value = "30")]
    pub heartbeat_secs: u64,

    /// Minimum seconds between reconnection attempts.
    #[arg(long, env = "RECONNECT_DELAY_SECS", default_value = "3")]
    pub reconnect_delay_secs: u64,

    /// Seconds of composer inactivity before typing:false goes out.
    #[arg(long, env = "TYPING_DEBOUNCE_SECS", default_value = "2")]
    pub typing_debounce_secs: u64,

    /// Seconds between rider location samples while sharing.
    #[arg(long, env = "LOCATION_INTERVAL_SECS", default_value = "10")]
    pub location_interval_secs: u64,

    /// Per-request timeout for device position lookups, in seconds.
    #[arg(long, env = "LOCATION_TIMEOUT_SECS", default_value = "5")]
    pub location_timeout_secs: u64,

    /// Rider only: publish a canned demo route instead of real positions.
    #[arg(long, env = "DEMO_ROUTE", default_value = "false")]
    pub demo_route: bool,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

impl Args {
    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            typing_debounce: Duration::from_secs(self.typing_debounce_secs),
        }
    }
}
