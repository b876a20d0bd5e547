use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Weather provider credentials and endpoint
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Weather defaults
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Connectivity probe settings
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
}

/// Weather provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OpenWeatherMap API key
    pub api_key: String,
    /// Provider base URL
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
}

fn default_provider_base_url() -> String {
    "https://api.openweathermap.org".to_string()
}

impl ProviderConfig {
    /// Check if an API key is configured (not a placeholder)
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_key.starts_with("YOUR_")
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("NIMBUS_WEATHER_API_KEY")
                .unwrap_or_else(|_| "YOUR_WEATHER_API_KEY".to_string()),
            base_url: default_provider_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Default unit system seeded into settings on first run
    /// (metric, imperial, or standard)
    pub default_units: String,

    /// Default refresh interval in minutes
    pub refresh_minutes: u32,

    /// Forecast days shown
    pub forecast_days: u32,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            default_units: "metric".to_string(),
            refresh_minutes: 60,
            forecast_days: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// Endpoint probed to detect internet reachability
    pub probe_url: String,

    /// Seconds between probes
    pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://clients3.google.com/generate_204".to_string(),
            probe_interval_secs: 15,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nimbus");

        Self {
            config_dir,
            provider: ProviderConfig::default(),
            weather: WeatherConfig::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        if !validation.warnings.is_empty() {
            for warning in &validation.warnings {
                tracing::warn!("Config warning: {}", warning);
            }
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.provider.base_url.is_empty() {
            result.add_error("provider.base_url", "Provider base URL must not be empty");
        }

        if !self.provider.is_configured() {
            result.add_warning(
                "provider.api_key",
                "Weather API key not configured - live fetches will fail",
            );
        }

        if !["metric", "imperial", "standard"].contains(&self.weather.default_units.as_str()) {
            result.add_warning(
                "weather.default_units",
                format!(
                    "Unknown unit system '{}' - metric will be used",
                    self.weather.default_units
                ),
            );
        }

        if self.weather.refresh_minutes == 0 {
            result.add_warning(
                "weather.refresh_minutes",
                "Refresh interval of 0 forces a live fetch on every request",
            );
        } else if self.weather.refresh_minutes > 1440 {
            result.add_warning(
                "weather.refresh_minutes",
                "Weather refresh interval is more than 24 hours",
            );
        }

        if self.weather.forecast_days == 0 {
            result.add_error("weather.forecast_days", "Forecast days must be greater than 0");
        }

        if self.connectivity.probe_interval_secs == 0 {
            result.add_error(
                "connectivity.probe_interval_secs",
                "Probe interval must be greater than 0",
            );
        }

        result
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("nimbus");
        Ok(config_dir.join("config.toml"))
    }

    /// Path to the on-device weather database
    pub fn database_path(&self) -> PathBuf {
        self.config_dir.join("nimbus.db")
    }
}
