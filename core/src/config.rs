/// Client configuration: endpoints and the realtime reconnection policy
use crate::error::{ChatError, Result};
use std::time::Duration;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:8080";
const REALTIME_PATH: &str = "/ws";

/// Reconnection policy for the realtime channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Retry at all after a failed or dropped connection
    pub reconnection: bool,

    /// Retries allowed after the first failure before giving up.
    /// A successful connect resets the count.
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for the exponential backoff
    pub max_delay: Duration,

    /// Deadline for a single connect attempt
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnection: true,
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never retries
    pub fn disabled() -> Self {
        Self {
            reconnection: false,
            ..Default::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based), or `None` once the
    /// policy is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if !self.reconnection || attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let delay = self
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the durable REST API
    pub api_url: Url,

    /// Realtime channel endpoint (ws/wss)
    pub realtime_url: Url,

    /// Per-request timeout for durable calls
    pub request_timeout: Duration,

    pub reconnect: ReconnectPolicy,
}

impl Config {
    /// Build a config from an API base URL, deriving the realtime endpoint
    pub fn new(api_url: &str) -> Result<Self> {
        let api_url = parse_api_url(api_url)?;
        let realtime_url = derive_realtime_url(&api_url)?;
        Ok(Self {
            api_url,
            realtime_url,
            request_timeout: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
        })
    }

    /// Override the realtime endpoint
    pub fn with_realtime_url(mut self, realtime_url: &str) -> Result<Self> {
        self.realtime_url = parse_realtime_url(realtime_url)?;
        Ok(self)
    }

    /// Read configuration from `PARLEY_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("PARLEY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let mut config = Self::new(&api_url)?;

        if let Some(realtime_url) = lookup("PARLEY_REALTIME_URL") {
            config = config.with_realtime_url(&realtime_url)?;
        }
        if let Some(flag) = lookup("PARLEY_RECONNECT") {
            config.reconnect.reconnection = !matches!(flag.as_str(), "0" | "false" | "no");
        }
        if let Some(n) = lookup("PARLEY_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = parse_attempts("PARLEY_MAX_ATTEMPTS", &n)?;
        }
        if let Some(ms) = lookup("PARLEY_CONNECT_TIMEOUT_MS") {
            config.reconnect.connect_timeout = parse_millis("PARLEY_CONNECT_TIMEOUT_MS", &ms)?;
        }

        Ok(config)
    }

    /// Apply command line flags on top of the environment configuration.
    ///
    /// Returns the config and the remaining positional arguments.
    pub fn from_args(args: &[String]) -> Result<(Self, Vec<String>)> {
        let mut config = Self::from_env()?;
        let mut positional = Vec::new();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--api-url" => {
                    let url = flag_value(args, i, "--api-url")?;
                    let realtime = config.realtime_url.clone();
                    let derived = derive_realtime_url(&config.api_url)?;
                    config.api_url = parse_api_url(url)?;
                    // Keep an explicit realtime override, re-derive otherwise
                    if realtime == derived {
                        config.realtime_url = derive_realtime_url(&config.api_url)?;
                    }
                    i += 2;
                }
                "--realtime-url" => {
                    let url = flag_value(args, i, "--realtime-url")?;
                    config.realtime_url = parse_realtime_url(url)?;
                    i += 2;
                }
                "--no-reconnect" => {
                    config.reconnect.reconnection = false;
                    i += 1;
                }
                "--max-attempts" => {
                    let n = flag_value(args, i, "--max-attempts")?;
                    config.reconnect.max_attempts = parse_attempts("--max-attempts", n)?;
                    i += 2;
                }
                "--connect-timeout-ms" => {
                    let ms = flag_value(args, i, "--connect-timeout-ms")?;
                    config.reconnect.connect_timeout = parse_millis("--connect-timeout-ms", ms)?;
                    i += 2;
                }
                other if other.starts_with("--") => {
                    return Err(ChatError::Configuration(format!("Unknown flag: {}", other)));
                }
                other => {
                    positional.push(other.to_string());
                    i += 1;
                }
            }
        }

        Ok((config, positional))
    }

    /// Join a path onto the API base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ChatError::Configuration(format!("Invalid endpoint {}: {}", path, e)))
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| ChatError::Configuration(format!("{} requires a value", flag)))
}

fn parse_attempts(name: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| ChatError::Configuration(format!("{} must be a number, got {:?}", name, raw)))
}

fn parse_millis(name: &str, raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ChatError::Configuration(format!("{} must be a number, got {:?}", name, raw)))
}

fn parse_api_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| ChatError::Configuration(format!("Invalid API URL {:?}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ChatError::Configuration(format!(
            "API URL must be http or https, got {}",
            url.scheme()
        )));
    }
    // Url::join replaces the last segment unless the base ends with '/'
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_realtime_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| ChatError::Configuration(format!("Invalid realtime URL {:?}: {}", raw, e)))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ChatError::Configuration(format!(
            "Realtime URL must be ws or wss, got {}",
            url.scheme()
        )));
    }
    Ok(url)
}

fn derive_realtime_url(api_url: &Url) -> Result<Url> {
    let scheme = if api_url.scheme() == "https" { "wss" } else { "ws" };
    let host = api_url
        .host_str()
        .ok_or_else(|| ChatError::Configuration("API URL has no host".to_string()))?;
    let raw = match api_url.port() {
        Some(port) => format!("{}://{}:{}{}", scheme, host, port, REALTIME_PATH),
        None => format!("{}://{}{}", scheme, host, REALTIME_PATH),
    };
    parse_realtime_url(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_url_is_derived_from_api_url() {
        let config = Config::new("http://localhost:8080").unwrap();
        assert_eq!(config.realtime_url.as_str(), "ws://localhost:8080/ws");

        let config = Config::new("https://chat.example.com/base").unwrap();
        assert_eq!(config.realtime_url.as_str(), "wss://chat.example.com/ws");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let config = Config::new("https://chat.example.com/base").unwrap();
        let url = config.endpoint("/api/messages/u2").unwrap();
        assert_eq!(url.as_str(), "https://chat.example.com/base/api/messages/u2");
    }

    #[test]
    fn test_invalid_urls_are_configuration_errors() {
        assert!(matches!(
            Config::new("not a url"),
            Err(ChatError::Configuration(_))
        ));
        assert!(matches!(
            Config::new("ftp://example.com"),
            Err(ChatError::Configuration(_))
        ));
        let config = Config::new("http://localhost:8080").unwrap();
        assert!(matches!(
            config.with_realtime_url("http://localhost:8080/ws"),
            Err(ChatError::Configuration(_))
        ));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            reconnection: true,
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for(6), None);
    }

    #[test]
    fn test_disabled_policy_never_retries() {
        assert_eq!(ReconnectPolicy::disabled().delay_for(1), None);
    }

    #[test]
    fn test_args_override_policy() {
        let args: Vec<String> = ["--no-reconnect", "--max-attempts", "2", "send", "u2", "hi"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (config, rest) = Config::from_args(&args).unwrap();
        assert!(!config.reconnect.reconnection);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(rest, vec!["send", "u2", "hi"]);
    }

    #[test]
    fn test_env_overrides_policy() {
        let config = Config::from_lookup(|key| match key {
            "PARLEY_MAX_ATTEMPTS" => Some("7".to_string()),
            "PARLEY_CONNECT_TIMEOUT_MS" => Some("1500".to_string()),
            "PARLEY_RECONNECT" => Some("false".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.reconnect.max_attempts, 7);
        assert_eq!(config.reconnect.connect_timeout, Duration::from_millis(1500));
        assert!(!config.reconnect.reconnection);
    }

    #[test]
    fn test_malformed_numbers_are_configuration_errors() {
        let bad_attempts = Config::from_lookup(|key| {
            (key == "PARLEY_MAX_ATTEMPTS").then(|| "five".to_string())
        });
        assert!(matches!(bad_attempts, Err(ChatError::Configuration(_))));

        let bad_timeout = Config::from_lookup(|key| {
            (key == "PARLEY_CONNECT_TIMEOUT_MS").then(|| "-1".to_string())
        });
        assert!(matches!(bad_timeout, Err(ChatError::Configuration(_))));

        let args: Vec<String> = vec!["--connect-timeout-ms".to_string(), "soon".to_string()];
        assert!(matches!(
            Config::from_args(&args),
            Err(ChatError::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let args = vec!["--bogus".to_string()];
        assert!(matches!(
            Config::from_args(&args),
            Err(ChatError::Configuration(_))
        ));
    }
}
