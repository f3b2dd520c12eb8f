use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::delta::event_log::MAX_EVENTS_BUFFER;
use crate::delta::sessions::SESSION_TTL_SECONDS;
use crate::pairing::DEFAULT_LIFESPAN_DAYS;

#[derive(Subcommand, Debug, Clone)]
pub enum EdgeMode {
    /// Serve the watch API against the built-in in-memory hub
    Offline(OfflineArgs),
}

#[derive(ValueEnum, Debug, Clone)]
pub enum LogFormat {
    Plain,
    Json,
    Pretty,
}

#[derive(Args, Debug, Clone)]
pub struct OfflineArgs {
    /// JSON file with entity states to seed the in-memory hub with
    #[clap(short, long, env)]
    pub states_file: Option<PathBuf>,

    /// Bearer tokens accepted on authenticated endpoints. Accepts a
    /// comma-separated list
    #[clap(short, long, env, value_delimiter = ',')]
    pub tokens: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct HttpServerArgs {
    /// Which port should this server listen for HTTP traffic on
    #[clap(short, long, env, default_value_t = 3069)]
    pub port: u16,
    /// Which interfaces should this server listen for HTTP traffic on
    #[clap(short, long, env, default_value = "0.0.0.0")]
    pub interface: String,
    /// Which base path should this server listen for HTTP traffic on
    #[clap(short, long, env, default_value = "")]
    pub base_path: String,

    /// How many workers should be started to handle requests.
    /// Defaults to number of physical cpus
    #[clap(short, long, env, global = true, default_value_t = num_cpus::get_physical())]
    pub workers: usize,
}

impl HttpServerArgs {
    pub fn http_server_tuple(&self) -> (String, u16) {
        (self.interface.clone(), self.port)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct CliArgs {
    #[clap(flatten)]
    pub http: HttpServerArgs,

    #[command(subcommand)]
    pub mode: EdgeMode,

    /// How many delta events the in-memory ring retains
    #[clap(long, env, global = true, default_value_t = MAX_EVENTS_BUFFER)]
    pub event_buffer_size: usize,

    /// Drop watch sessions idle for longer than this
    #[clap(long, env, global = true, default_value_t = SESSION_TTL_SECONDS)]
    pub session_ttl_seconds: i64,

    /// Where to persist registered push tokens. Omit for in-memory only
    #[clap(long, env, global = true)]
    pub push_token_file: Option<PathBuf>,

    /// Externally reachable hub URL, used in pairing payloads
    #[clap(long, env, global = true)]
    pub external_url: Option<String>,

    /// LAN hub URL, used in pairing payloads
    #[clap(long, env, global = true)]
    pub internal_url: Option<String>,

    /// Lifespan of refresh tokens created for pairing, in days
    #[clap(long, env, global = true, default_value_t = DEFAULT_LIFESPAN_DAYS)]
    pub pairing_lifespan_days: i64,

    /// Create an active pairing code at startup and log its URI
    #[clap(long, env, global = true, default_value_t = false)]
    pub pairing_on_startup: bool,

    /// Which log format to use
    #[clap(short, long, env, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Print a markdown help document and exit
    #[clap(long, global = true, hide = true)]
    pub markdown_help: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_mode_parses_with_defaults() {
        let args = CliArgs::parse_from(["wrist-edge", "offline"]);
        assert_eq!(args.http.port, 3069);
        assert_eq!(args.event_buffer_size, MAX_EVENTS_BUFFER);
        assert_eq!(args.session_ttl_seconds, SESSION_TTL_SECONDS);
        assert!(!args.pairing_on_startup);
        let EdgeMode::Offline(offline) = args.mode;
        assert!(offline.states_file.is_none());
        assert!(offline.tokens.is_empty());
    }

    #[test]
    fn offline_tokens_split_on_commas() {
        let args = CliArgs::parse_from([
            "wrist-edge",
            "offline",
            "--states-file",
            "demo/states.json",
            "--tokens",
            "a,b,c",
        ]);
        let EdgeMode::Offline(offline) = args.mode;
        assert_eq!(offline.tokens, vec!["a", "b", "c"]);
        assert_eq!(
            offline.states_file.unwrap().to_str().unwrap(),
            "demo/states.json"
        );
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let args = CliArgs::parse_from([
            "wrist-edge",
            "offline",
            "--session-ttl-seconds",
            "60",
            "--external-url",
            "https://ha.example",
        ]);
        assert_eq!(args.session_ttl_seconds, 60);
        assert_eq!(args.external_url.as_deref(), Some("https://ha.example"));
    }

    #[test]
    fn missing_mode_is_rejected() {
        assert!(CliArgs::try_parse_from(["wrist-edge"]).is_err());
    }
}
