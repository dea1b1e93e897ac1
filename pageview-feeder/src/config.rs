use std::net::SocketAddr;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use http::HeaderName;
use tracing::debug;

use crate::error::ConfigError;

pub const DEFAULT_QUEUE_SIZE: usize = 1000;
pub const MIN_QUEUE_SIZE: usize = 100;

/// Configuration of the proxy binary. The feeder settings are nested and read
/// from the same environment.
#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    #[envconfig(default = "127.0.0.1:9102")]
    pub metrics_address: SocketAddr,

    pub upstream_url: String,

    #[envconfig(default = "30000")]
    pub upstream_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub feeder: FeederConfig,
}

/// Raw feeder configuration, as provided by the host. Call
/// [`FeederConfig::normalize`] to get validated [`Settings`].
#[derive(Envconfig, Clone, Debug)]
pub struct FeederConfig {
    /// URL of the events API endpoint of the collector.
    pub event_endpoint: Option<String>,

    /// Hosts that should be reported. The first one is the fallback domain
    /// used when `report_any_host` is enabled.
    #[envconfig(default = "")]
    pub domains: CommaSeparated,

    /// Alternative list of file extensions to report. Disables the default set.
    #[envconfig(default = "")]
    pub report_extensions: CommaSeparated,

    #[envconfig(default = "false")]
    pub report_all_resources: bool,

    #[envconfig(default = "false")]
    pub report_any_host: bool,

    /// Report 4xx and 5xx responses too.
    #[envconfig(default = "false")]
    pub report_errors: bool,

    /// Header to take the client IP from instead of the peer address. Requests
    /// missing it, or carrying something that is not an IP, are not reported.
    pub remote_ip_from_header: Option<String>,

    /// Zero selects `DEFAULT_QUEUE_SIZE`; values below `MIN_QUEUE_SIZE` are raised.
    #[envconfig(default = "0")]
    pub queue_size: usize,

    #[envconfig(default = "1000")]
    pub request_timeout: EnvMsDuration,

    /// Only read by the binary, to pick its default log level.
    #[envconfig(default = "false")]
    pub debug_logging: bool,
}

impl FeederConfig {
    pub fn new(event_endpoint: &str, domains: &[&str]) -> Self {
        Self {
            event_endpoint: Some(event_endpoint.to_owned()),
            domains: CommaSeparated(domains.iter().map(|d| d.to_string()).collect()),
            report_extensions: CommaSeparated::default(),
            report_all_resources: false,
            report_any_host: false,
            report_errors: false,
            remote_ip_from_header: None,
            queue_size: 0,
            request_timeout: EnvMsDuration(time::Duration::from_secs(1)),
            debug_logging: false,
        }
    }

    /// Check required values and apply defaults.
    pub fn normalize(self) -> Result<Settings, ConfigError> {
        let endpoint = match self.event_endpoint.as_deref().map(str::trim) {
            None | Some("") => return Err(ConfigError::MissingEventEndpoint),
            Some(endpoint) => endpoint,
        };
        let event_endpoint =
            reqwest::Url::parse(endpoint).map_err(|e| ConfigError::InvalidEventEndpoint {
                endpoint: endpoint.to_owned(),
                source: e,
            })?;

        let domains: Vec<String> = self
            .domains
            .0
            .into_iter()
            .filter(|d| !d.is_empty())
            .collect();
        if domains.is_empty() {
            return Err(ConfigError::NoDomains);
        }

        let queue_size = match self.queue_size {
            0 => {
                debug!("using default queue size of {}", DEFAULT_QUEUE_SIZE);
                DEFAULT_QUEUE_SIZE
            }
            size if size < MIN_QUEUE_SIZE => {
                debug!("raising queue size to {} (was {})", MIN_QUEUE_SIZE, size);
                MIN_QUEUE_SIZE
            }
            size => size,
        };

        let report_extensions = self
            .report_extensions
            .0
            .into_iter()
            .map(|ext| {
                if ext.is_empty() || ext.starts_with('.') {
                    ext
                } else {
                    debug!("converting report extension {:?} to \".{}\"", ext, ext);
                    format!(".{ext}")
                }
            })
            .collect();

        let remote_ip_from_header = match self.remote_ip_from_header.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => Some(HeaderName::from_str(name).map_err(|_| {
                ConfigError::InvalidHeaderName(name.to_owned())
            })?),
        };

        Ok(Settings {
            event_endpoint,
            domains,
            report_extensions,
            report_all_resources: self.report_all_resources,
            report_any_host: self.report_any_host,
            report_errors: self.report_errors,
            remote_ip_from_header,
            queue_size,
            request_timeout: self.request_timeout.0,
        })
    }
}

/// Validated, immutable feeder configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub event_endpoint: reqwest::Url,
    /// Never empty.
    pub domains: Vec<String>,
    /// Every entry is empty or starts with a dot.
    pub report_extensions: Vec<String>,
    pub report_all_resources: bool,
    pub report_any_host: bool,
    pub report_errors: bool,
    pub remote_ip_from_header: Option<HeaderName>,
    /// At least `MIN_QUEUE_SIZE`.
    pub queue_size: usize,
    pub request_timeout: time::Duration,
}

impl Settings {
    pub fn fallback_domain(&self) -> &str {
        &self.domains[0]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// A comma separated list of values. An empty string is an empty list, other
/// empty items are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommaSeparated(pub Vec<String>);

impl FromStr for CommaSeparated {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(CommaSeparated(Vec::new()));
        }

        Ok(CommaSeparated(
            s.split(',').map(|item| item.trim().to_owned()).collect(),
        ))
    }
}
