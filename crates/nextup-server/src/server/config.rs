use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use nextup::{BroadcastMode, DEFAULT_OBSERVER_BUFFER};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const ENV_DATABASE_URL: &str = "NEXTUP_DATABASE_URL";
pub const ENV_BROADCAST: &str = "NEXTUP_BROADCAST";
pub const ENV_OBSERVER_BUFFER: &str = "NEXTUP_OBSERVER_BUFFER";
pub const ENV_LEDGER_BUFFER: &str = "NEXTUP_LEDGER_BUFFER";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "NEXTUP_SHUTDOWN_TIMEOUT";

const DEFAULT_LEDGER_BUFFER: usize = 1024;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 3;

/// Command line of the `nextup-server` binary.
///
/// The listen port is the only flag. Everything else is tuned through the
/// environment, see [`ServerConfig`].
#[derive(Parser, Debug, Clone)]
#[command(
    name = "nextup-server",
    version,
    about = "Hands out sequential A0-Z9 queue tickets over HTTP and WebSocket"
)]
pub struct CliArgs {
    /// TCP port to listen on. The server binds every interface.
    ///
    /// Environment variable: `NEXTUP_PORT`
    #[arg(long, env = "NEXTUP_PORT", default_value_t = 8080)]
    pub port: u16,
}

/// Validated runtime settings.
///
/// | Variable                  | Default        | Meaning                                   |
/// |---------------------------|----------------|-------------------------------------------|
/// | `NEXTUP_DATABASE_URL`     | unset          | SQLite URL; unset keeps state in memory   |
/// | `NEXTUP_BROADCAST`        | `state`        | `state` or `event` observer payloads      |
/// | `NEXTUP_OBSERVER_BUFFER`  | `32`           | payloads buffered per observer            |
/// | `NEXTUP_LEDGER_BUFFER`    | `1024`         | ledger commands buffered before dropping  |
/// | `NEXTUP_SHUTDOWN_TIMEOUT` | `3`            | seconds allowed to flush the ledger       |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub database_url: Option<String>,
    pub broadcast: BroadcastMode,
    pub observer_buffer: usize,
    pub ledger_buffer: usize,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Builds the config from parsed arguments and an environment lookup.
    pub fn from_lookup<F>(args: CliArgs, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let setting = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let broadcast = match setting(ENV_BROADCAST) {
            Some(raw) => raw
                .parse::<BroadcastMode>()
                .with_context(|| format!("invalid {ENV_BROADCAST}"))?,
            None => BroadcastMode::default(),
        };

        let observer_buffer =
            parse_count(ENV_OBSERVER_BUFFER, setting(ENV_OBSERVER_BUFFER), DEFAULT_OBSERVER_BUFFER)?;
        let ledger_buffer =
            parse_count(ENV_LEDGER_BUFFER, setting(ENV_LEDGER_BUFFER), DEFAULT_LEDGER_BUFFER)?;

        let shutdown_timeout = match setting(ENV_SHUTDOWN_TIMEOUT) {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .with_context(|| format!("{ENV_SHUTDOWN_TIMEOUT} must be a number of seconds"))?,
            ),
            None => Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        };

        Ok(Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port),
            database_url: setting(ENV_DATABASE_URL).map(|url| url.trim().to_string()),
            broadcast,
            observer_buffer,
            ledger_buffer,
            shutdown_timeout,
        })
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        Self::from_lookup(args, |key| std::env::var(key).ok())
    }
}

fn parse_count(key: &str, raw: Option<String>, default: usize) -> anyhow::Result<usize> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a positive integer"))?;
    if value == 0 {
        bail!("{key} must be greater than 0");
    }
    Ok(value)
}
