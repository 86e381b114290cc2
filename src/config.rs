use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for license API requests in seconds
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Clock rollback allowed before it counts as tampering
pub const DEFAULT_TAMPER_TOLERANCE_SECS: u64 = 120;

pub const DEFAULT_TRIAL_CHECK_SECS: u64 = 60 * 60;
pub const DEFAULT_TAMPER_CHECK_SECS: u64 = 5 * 60;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;
pub const DEFAULT_REMOTE_POLL_SECS: u64 = 5 * 60;

const APP_DIR_NAME: &str = "tillguard";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseConfig {
    pub api_base_url: String,
    pub api_timeout: Duration,
    pub data_dir: PathBuf,
    pub tamper_tolerance: Duration,
    pub trial_check_interval: Duration,
    pub tamper_check_interval: Duration,
    pub heartbeat_interval: Duration,
    pub remote_poll_interval: Duration,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_timeout: Duration::from_secs(DEFAULT_API_TIMEOUT_SECS),
            data_dir: default_data_dir(),
            tamper_tolerance: Duration::from_secs(DEFAULT_TAMPER_TOLERANCE_SECS),
            trial_check_interval: Duration::from_secs(DEFAULT_TRIAL_CHECK_SECS),
            tamper_check_interval: Duration::from_secs(DEFAULT_TAMPER_CHECK_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            remote_poll_interval: Duration::from_secs(DEFAULT_REMOTE_POLL_SECS),
        }
    }
}

impl LicenseConfig {
    /// Defaults overridden by `TILLGUARD_*` environment variables (a `.env` file is honoured).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let api_base_url = std::env::var("TILLGUARD_API_URL")
            .ok()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.api_base_url);
        let data_dir = std::env::var("TILLGUARD_DATA_DIR")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let tolerance = secs_from_env("TILLGUARD_TAMPER_TOLERANCE_SECS", DEFAULT_TAMPER_TOLERANCE_SECS);
        if tolerance < DEFAULT_TAMPER_TOLERANCE_SECS {
            log::warn!(
                "Tamper tolerance of {}s is below the {}s minimum; using the minimum",
                tolerance,
                DEFAULT_TAMPER_TOLERANCE_SECS
            );
        }

        Self {
            api_base_url,
            api_timeout: Duration::from_secs(secs_from_env(
                "TILLGUARD_API_TIMEOUT_SECS",
                DEFAULT_API_TIMEOUT_SECS,
            )),
            data_dir,
            tamper_tolerance: Duration::from_secs(tolerance.max(DEFAULT_TAMPER_TOLERANCE_SECS)),
            trial_check_interval: Duration::from_secs(secs_from_env(
                "TILLGUARD_TRIAL_CHECK_SECS",
                DEFAULT_TRIAL_CHECK_SECS,
            )),
            tamper_check_interval: Duration::from_secs(secs_from_env(
                "TILLGUARD_TAMPER_CHECK_SECS",
                DEFAULT_TAMPER_CHECK_SECS,
            )),
            heartbeat_interval: Duration::from_secs(secs_from_env(
                "TILLGUARD_HEARTBEAT_SECS",
                DEFAULT_HEARTBEAT_SECS,
            )),
            remote_poll_interval: Duration::from_secs(secs_from_env(
                "TILLGUARD_REMOTE_POLL_SECS",
                DEFAULT_REMOTE_POLL_SECS,
            )),
        }
    }
}

fn default_api_base_url() -> String {
    #[cfg(debug_assertions)]
    {
        "http://localhost:3000/api/v1".to_string()
    }
    #[cfg(not(debug_assertions))]
    {
        "https://license.tillguard.app/api/v1".to_string()
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

/// Positive integer seconds from `name`, or `default` when unset or invalid.
fn secs_from_env(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => secs,
            _ => {
                log::warn!("Ignoring invalid {}={:?}; using {}s", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
