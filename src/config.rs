use std::{collections::HashSet, path::PathBuf, time::Duration};

use url::Url;

use crate::error::ApiError;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_STATIC_DIR: &str = "public";
pub const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";

/// Startup configuration shared by every handler through `AppState`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub download_dir: PathBuf,
    pub static_dir: PathBuf,
    pub yt_dlp_bin: PathBuf,
    /// `None` lets the collaborator run for as long as it needs.
    pub download_timeout: Option<Duration>,
    /// Include internal error text in 500 responses.
    pub expose_error_details: bool,
    /// Normalized origins; `None` allows any origin.
    pub allowed_origins: Option<HashSet<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            yt_dlp_bin: PathBuf::from(DEFAULT_YT_DLP_BIN),
            download_timeout: None,
            expose_error_details: false,
            allowed_origins: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source so tests
    /// never have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };

        let bind_addr = resolve_bind_addr(&lookup).unwrap_or(defaults.bind_addr);
        let download_dir = text("DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.download_dir);
        let static_dir = text("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);
        let yt_dlp_bin = text("YT_DLP_BIN")
            .map(PathBuf::from)
            .unwrap_or(defaults.yt_dlp_bin);
        let download_timeout = lookup("YT_DLP_TIMEOUT_SECONDS")
            .as_deref()
            .and_then(parse_u64)
            .filter(|value| *value > 0)
            .map(Duration::from_secs);
        let expose_error_details = lookup("EXPOSE_ERROR_DETAILS")
            .as_deref()
            .and_then(parse_bool)
            .unwrap_or(defaults.expose_error_details);
        let allowed_origins = match lookup("ALLOWED_ORIGINS") {
            Some(value) => parse_allowed_origins(&value)?,
            None => None,
        };

        Ok(Self {
            bind_addr,
            download_dir,
            static_dir,
            yt_dlp_bin,
            download_timeout,
            expose_error_details,
            allowed_origins,
        })
    }
}

fn resolve_bind_addr<F>(lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(configured) =
        lookup("APP_ADDR").and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return Some(configured);
    }

    lookup("PORT")
        .and_then(|value| value.trim().parse::<u16>().ok())
        .map(|port| format!("0.0.0.0:{port}"))
}

fn parse_allowed_origins(value: &str) -> Result<Option<HashSet<String>>, ApiError> {
    let configured = value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .collect::<Vec<_>>();

    if configured.is_empty() || configured.contains(&"*") {
        return Ok(None);
    }

    configured
        .into_iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()
        .map(Some)
}

/// Reduces an origin to `scheme://host[:port]`, dropping default ports.
pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
