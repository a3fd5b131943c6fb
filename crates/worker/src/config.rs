use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use transcode_core::accel::parse_accel_setting;

use crate::error::ConfigError;

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults matching a stock media-server install.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Health endpoint bind address (default: `0.0.0.0`).
    pub listen_host: String,
    /// Health endpoint port (default: `3501`).
    pub listen_port: u16,
    /// Orchestrator base URL (default: `http://localhost:3500`).
    pub orchestrator_url: String,
    /// CPU sample window, which is also the stats period (default: 2 s).
    pub cpu_sample_interval: Duration,
    /// How long the startup benchmark runs (default: 1 s).
    pub benchmark_duration: Duration,
    /// Directory holding the transcoder binary.
    pub transcoder_path: PathBuf,
    /// File name of the transcoder binary.
    pub transcoder_name: String,
    /// Hardware acceleration method; `None` disables argument injection.
    pub hwaccel: Option<String>,
    /// Sleep duration of the diagnostic `testpayload` job (default: 5 s).
    pub diagnostic_sleep: Duration,
    /// Host name announced to the orchestrator.
    pub host: String,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                 | Default                      |
    /// |-------------------------|------------------------------|
    /// | `LISTENING_HOST`        | `0.0.0.0`                    |
    /// | `LISTENING_PORT`        | `3501`                       |
    /// | `ORCHESTRATOR_URL`      | `http://localhost:3500`      |
    /// | `STAT_CPU_INTERVAL`     | `2000` (ms)                  |
    /// | `STAT_CPU_OPS_DURATION` | `1000` (ms)                  |
    /// | `TRANSCODER_PATH`       | `/usr/lib/plexmediaserver/`  |
    /// | `TRANSCODER_NAME`       | `Plex Transcoder`            |
    /// | `FFMPEG_HWACCEL`        | unset (disabled)             |
    /// | `DIAGNOSTIC_SLEEP_MS`   | `5000`                       |
    /// | `HOSTNAME`              | OS host name                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_host = lookup("LISTENING_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let listen_port = parse_var(&lookup, "LISTENING_PORT", 3501u16, "port number")?;
        let orchestrator_url =
            lookup("ORCHESTRATOR_URL").unwrap_or_else(|| "http://localhost:3500".into());

        let cpu_sample_interval = parse_positive_ms(&lookup, "STAT_CPU_INTERVAL", 2000)?;
        let benchmark_duration = parse_positive_ms(&lookup, "STAT_CPU_OPS_DURATION", 1000)?;
        let diagnostic_sleep = Duration::from_millis(parse_var(
            &lookup,
            "DIAGNOSTIC_SLEEP_MS",
            5000u64,
            "duration in milliseconds",
        )?);

        let transcoder_path = lookup("TRANSCODER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/usr/lib/plexmediaserver/"));
        let transcoder_name =
            lookup("TRANSCODER_NAME").unwrap_or_else(|| "Plex Transcoder".into());

        let hwaccel = parse_accel_setting(lookup("FFMPEG_HWACCEL").as_deref());
        let host = detect_host(lookup("HOSTNAME"));

        Ok(Self {
            listen_host,
            listen_port,
            orchestrator_url,
            cpu_sample_interval,
            benchmark_duration,
            transcoder_path,
            transcoder_name,
            hwaccel,
            diagnostic_sleep,
            host,
        })
    }

    /// Full path of the transcoder binary.
    pub fn transcoder_binary(&self) -> PathBuf {
        self.transcoder_path.join(&self.transcoder_name)
    }

    /// WebSocket URL of the orchestrator event channel.
    pub fn orchestrator_ws_url(&self) -> String {
        to_ws_url(&self.orchestrator_url)
    }
}

fn parse_var<F, T>(
    lookup: &F,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value: raw,
        }),
    }
}

/// Parse a millisecond duration that must be greater than zero.
fn parse_positive_ms<F>(lookup: &F, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    const EXPECTED: &str = "positive duration in milliseconds";
    match parse_var(lookup, var, default, EXPECTED)? {
        0 => Err(ConfigError::Invalid {
            var,
            expected: EXPECTED,
            value: "0".into(),
        }),
        ms => Ok(Duration::from_millis(ms)),
    }
}

/// Map an `http(s)://` URL onto the matching `ws(s)://` scheme.
///
/// URLs already using a WebSocket scheme (or any other) are returned as-is.
pub fn to_ws_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

fn detect_host(env_host: Option<String>) -> String {
    env_host
        .filter(|h| !h.trim().is_empty())
        .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
        .unwrap_or_else(|| "unknown".to_string())
}
