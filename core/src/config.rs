//! Session and engine configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelConfig;
use crate::request::{PromptPolicy, ProviderKind, RequestMode};

/// Highest accepted request rate (one request per millisecond)
pub const MAX_RPM: u32 = 60_000;

/// Hard ceiling on sessions running under one orchestrator
pub const MAX_CONCURRENT_SESSIONS: usize = 5;

/// HTTP deadline used when no response-time ceiling is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(150_000);

/// An overload threshold that can be switched off
///
/// `Disabled` is distinct from a literal zero: `Enabled(0)` is applied as given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold<T> {
    /// Condition never triggers
    Disabled,
    /// Condition triggers at this value
    Enabled(T),
}

impl<T: Copy> Threshold<T> {
    /// Configured value, if enabled
    pub fn value(&self) -> Option<T> {
        match self {
            Threshold::Disabled => None,
            Threshold::Enabled(v) => Some(*v),
        }
    }

    /// Whether the condition is active
    pub fn is_enabled(&self) -> bool {
        matches!(self, Threshold::Enabled(_))
    }
}

/// Limits that decide when an auto-ramp session is overloaded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverloadThresholds {
    /// Minimum per-minute success rate, in percent
    pub success_rate_floor: Threshold<f64>,

    /// Consecutive failures that end the session
    pub max_consecutive_failures: Threshold<u32>,

    /// Ceiling on the running average latency, in milliseconds
    pub response_time_ceiling_ms: Threshold<u64>,
}

impl Default for OverloadThresholds {
    fn default() -> Self {
        Self {
            success_rate_floor: Threshold::Enabled(80.0),
            max_consecutive_failures: Threshold::Enabled(10),
            response_time_ceiling_ms: Threshold::Enabled(150_000),
        }
    }
}

impl OverloadThresholds {
    /// Every condition switched off
    pub fn disabled() -> Self {
        Self {
            success_rate_floor: Threshold::Disabled,
            max_consecutive_failures: Threshold::Disabled,
            response_time_ceiling_ms: Threshold::Disabled,
        }
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(floor) = self.success_rate_floor.value() {
            if !(0.0..=100.0).contains(&floor) {
                return Err(ConfigError::InvalidThreshold(format!(
                    "success rate floor must be between 0 and 100, got {floor}"
                )));
            }
        }
        Ok(())
    }
}

/// Per-session threshold overrides; unset fields take the engine defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdOverrides {
    /// Override for [`OverloadThresholds::success_rate_floor`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate_floor: Option<Threshold<f64>>,

    /// Override for [`OverloadThresholds::max_consecutive_failures`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<Threshold<u32>>,

    /// Override for [`OverloadThresholds::response_time_ceiling_ms`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ceiling_ms: Option<Threshold<u64>>,
}

impl ThresholdOverrides {
    /// Override every field
    pub fn all(thresholds: OverloadThresholds) -> Self {
        Self {
            success_rate_floor: Some(thresholds.success_rate_floor),
            max_consecutive_failures: Some(thresholds.max_consecutive_failures),
            response_time_ceiling_ms: Some(thresholds.response_time_ceiling_ms),
        }
    }

    /// Merge over `defaults`
    pub fn resolve(&self, defaults: &OverloadThresholds) -> OverloadThresholds {
        OverloadThresholds {
            success_rate_floor: self
                .success_rate_floor
                .unwrap_or(defaults.success_rate_floor),
            max_consecutive_failures: self
                .max_consecutive_failures
                .unwrap_or(defaults.max_consecutive_failures),
            response_time_ceiling_ms: self
                .response_time_ceiling_ms
                .unwrap_or(defaults.response_time_ceiling_ms),
        }
    }
}

/// Auto-mode ramp parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRamp {
    /// Rate at session start
    pub initial_rpm: u32,

    /// Increase applied at each step
    pub step_rpm: u32,

    /// Minimum time between steps
    #[serde(with = "humantime_serde")]
    pub step_interval: Duration,

    /// Rate never exceeds this
    pub max_rpm: u32,
}

impl Default for AutoRamp {
    fn default() -> Self {
        Self {
            initial_rpm: 10,
            step_rpm: 10,
            step_interval: Duration::from_secs(60),
            max_rpm: 1000,
        }
    }
}

impl AutoRamp {
    /// Create a ramp
    pub fn new(initial_rpm: u32, step_rpm: u32, step_interval: Duration, max_rpm: u32) -> Self {
        Self {
            initial_rpm,
            step_rpm,
            step_interval,
            max_rpm,
        }
    }

    /// Validate the ramp bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_rpm == 0 {
            return Err(ConfigError::InvalidRamp(
                "initial rpm must be at least 1".into(),
            ));
        }
        if self.step_interval.is_zero() {
            return Err(ConfigError::InvalidRamp(
                "step interval must be positive".into(),
            ));
        }
        if self.max_rpm < self.initial_rpm {
            return Err(ConfigError::InvalidRamp(format!(
                "max rpm {} is below initial rpm {}",
                self.max_rpm, self.initial_rpm
            )));
        }
        if self.max_rpm > MAX_RPM {
            return Err(ConfigError::InvalidRamp(format!(
                "max rpm must not exceed {MAX_RPM}"
            )));
        }
        Ok(())
    }
}

/// Request rate policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RateMode {
    /// Constant rate for the whole session
    Fixed {
        /// Requests per minute
        rpm: u32,
    },
    /// Stepwise ramp until overload or the maximum
    Auto {
        /// Ramp parameters; `None` takes the engine defaults
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ramp: Option<AutoRamp>,
    },
}

impl RateMode {
    /// Short label for summaries
    pub fn label(&self) -> &'static str {
        match self {
            RateMode::Fixed { .. } => "fixed",
            RateMode::Auto { .. } => "auto",
        }
    }

    /// Whether the detector is active for this mode
    pub fn is_auto(&self) -> bool {
        matches!(self, RateMode::Auto { .. })
    }
}

/// Configuration of one test session
///
/// Supplied once at start and immutable afterwards.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the endpoint under test
    pub endpoint: String,

    /// Model identifier sent with each request
    pub model: String,

    /// API credential; never serialized
    #[serde(default, skip_serializing)]
    pub credential: String,

    /// Vendor dialect
    pub provider: ProviderKind,

    /// Streaming or single-shot
    #[serde(default)]
    pub request_mode: RequestMode,

    /// Prompt selection
    #[serde(default)]
    pub prompt: PromptPolicy,

    /// Wall-clock limit (fixed mode only)
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,

    /// Rate policy
    pub rate: RateMode,

    /// Overload threshold overrides
    #[serde(default)]
    pub thresholds: ThresholdOverrides,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("credential", &"<redacted>")
            .field("provider", &self.provider)
            .field("request_mode", &self.request_mode)
            .field("prompt", &self.prompt.label())
            .field("duration", &self.duration)
            .field("rate", &self.rate)
            .finish()
    }
}

impl SessionConfig {
    /// Create a fixed-rate config with default prompt and mode
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        credential: impl Into<String>,
        provider: ProviderKind,
        rate: RateMode,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            credential: credential.into(),
            provider,
            request_mode: RequestMode::default(),
            prompt: PromptPolicy::default(),
            duration: None,
            rate,
            thresholds: ThresholdOverrides::default(),
        }
    }

    /// Set the request mode
    pub fn with_request_mode(mut self, mode: RequestMode) -> Self {
        self.request_mode = mode;
        self
    }

    /// Set the prompt policy
    pub fn with_prompt(mut self, prompt: PromptPolicy) -> Self {
        self.prompt = prompt;
        self
    }

    /// Set the duration limit
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Replace all thresholds
    pub fn with_thresholds(mut self, thresholds: OverloadThresholds) -> Self {
        self.thresholds = ThresholdOverrides::all(thresholds);
        self
    }

    /// Effective thresholds after applying engine defaults
    pub fn thresholds(&self, defaults: &EngineDefaults) -> OverloadThresholds {
        self.thresholds.resolve(&defaults.thresholds)
    }

    /// Effective ramp, `None` in fixed mode
    pub fn ramp(&self, defaults: &EngineDefaults) -> Option<AutoRamp> {
        match self.rate {
            RateMode::Fixed { .. } => None,
            RateMode::Auto { ramp } => Some(ramp.unwrap_or(defaults.auto_ramp)),
        }
    }

    /// Rate at session start
    pub fn initial_rpm(&self, defaults: &EngineDefaults) -> u32 {
        match self.rate {
            RateMode::Fixed { rpm } => rpm,
            RateMode::Auto { ramp } => ramp.unwrap_or(defaults.auto_ramp).initial_rpm,
        }
    }

    /// Duration limit honoured by the session timer
    pub fn duration_limit(&self) -> Option<Duration> {
        match self.rate {
            RateMode::Fixed { .. } => self.duration.filter(|d| !d.is_zero()),
            RateMode::Auto { .. } => None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyField("endpoint"));
        }
        let url = url::Url::parse(self.endpoint.trim())
            .map_err(|e| ConfigError::InvalidEndpoint(format!("{}: {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint(format!(
                "{}: scheme must be http or https",
                self.endpoint
            )));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::EmptyField("model"));
        }
        if self.credential.trim().is_empty() {
            return Err(ConfigError::EmptyField("credential"));
        }

        match self.rate {
            RateMode::Fixed { rpm } => {
                if rpm == 0 || rpm > MAX_RPM {
                    return Err(ConfigError::InvalidRate(format!(
                        "rpm must be between 1 and {MAX_RPM}, got {rpm}"
                    )));
                }
            }
            RateMode::Auto { ramp: Some(ramp) } => ramp.validate()?,
            RateMode::Auto { ramp: None } => {}
        }

        if let Some(Threshold::Enabled(floor)) = self.thresholds.success_rate_floor {
            if !(0.0..=100.0).contains(&floor) {
                return Err(ConfigError::InvalidThreshold(format!(
                    "success rate floor must be between 0 and 100, got {floor}"
                )));
            }
        }

        Ok(())
    }

    /// Credential-free description for status and history
    pub fn summary(&self, defaults: &EngineDefaults) -> ConfigSummary {
        ConfigSummary {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            provider: self.provider,
            request_mode: self.request_mode,
            prompt_policy: self.prompt.label().to_string(),
            rate_mode: self.rate.label().to_string(),
            target_rpm: self.initial_rpm(defaults),
            max_rpm: self.ramp(defaults).map(|r| r.max_rpm),
            duration_ms: self.duration_limit().map(|d| d.as_millis() as u64),
        }
    }
}

/// Echo of a session config without the credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSummary {
    /// Endpoint base URL
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Vendor dialect
    pub provider: ProviderKind,
    /// Streaming or single-shot
    pub request_mode: RequestMode,
    /// `fixed` or `random`
    pub prompt_policy: String,
    /// `fixed` or `auto`
    pub rate_mode: String,
    /// Configured (fixed) or initial (auto) rate
    pub target_rpm: u32,
    /// Ramp ceiling in auto mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rpm: Option<u32>,
    /// Duration limit in fixed mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Capacities of the per-session bounded buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferCapacities {
    /// Latency samples in the running average
    pub latencies: usize,
    /// Error log entries
    pub error_log: usize,
    /// Request log entries
    pub request_log: usize,
    /// Closed minute aggregates (1440 is one day)
    pub minute_aggregates: usize,
    /// Distinct error tally keys; later messages count under
    /// [`crate::stats::OTHER_ERRORS_KEY`]
    pub error_tally: usize,
}

impl Default for BufferCapacities {
    fn default() -> Self {
        Self {
            latencies: 1000,
            error_log: 100,
            request_log: 500,
            minute_aggregates: 1440,
            error_tally: 200,
        }
    }
}

/// Engine-wide defaults shared read-only by every session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineDefaults {
    /// Thresholds applied where a session sets no override
    pub thresholds: OverloadThresholds,

    /// Ramp used by auto sessions without their own
    pub auto_ramp: AutoRamp,

    /// Minimum spacing of state broadcasts
    #[serde(with = "humantime_serde")]
    pub broadcast_throttle: Duration,

    /// Bounded buffer sizes
    pub capacities: BufferCapacities,

    /// Error tally keys are truncated to this many characters
    pub error_key_length: usize,

    /// Concurrent sessions accepted per batch
    pub max_sessions: usize,

    /// Internal channel sizes
    pub channels: ChannelConfig,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            thresholds: OverloadThresholds::default(),
            auto_ramp: AutoRamp::default(),
            broadcast_throttle: Duration::from_millis(200),
            capacities: BufferCapacities::default(),
            error_key_length: 100,
            max_sessions: MAX_CONCURRENT_SESSIONS,
            channels: ChannelConfig::default(),
        }
    }
}

impl EngineDefaults {
    /// Set the default thresholds
    pub fn with_thresholds(mut self, thresholds: OverloadThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the broadcast throttle window
    pub fn with_broadcast_throttle(mut self, window: Duration) -> Self {
        self.broadcast_throttle = window;
        self
    }

    /// Per-request HTTP deadline
    ///
    /// This is the response-time ceiling, even when a session disables
    /// the latency condition.
    pub fn request_timeout(&self) -> Duration {
        self.thresholds
            .response_time_ceiling_ms
            .value()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Validate the defaults
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.auto_ramp.validate()?;
        if self.max_sessions == 0 || self.max_sessions > MAX_CONCURRENT_SESSIONS {
            return Err(ConfigError::InvalidRate(format!(
                "max sessions must be between 1 and {MAX_CONCURRENT_SESSIONS}"
            )));
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required field is empty
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// Endpoint is not a usable URL
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Rate outside the accepted range
    #[error("invalid rate: {0}")]
    InvalidRate(String),

    /// Ramp parameters inconsistent
    #[error("invalid auto ramp: {0}")]
    InvalidRamp(String),

    /// Threshold outside its domain
    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(rpm: u32) -> SessionConfig {
        SessionConfig::new(
            "https://api.openai.com",
            "gpt-4o-mini",
            "sk-test",
            ProviderKind::OpenAI,
            RateMode::Fixed { rpm },
        )
    }

    #[test]
    fn test_valid_fixed_config() {
        assert!(fixed(60).validate().is_ok());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut config = fixed(60);
        config.model = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyField("model"))
        ));

        let mut config = fixed(60);
        config.credential.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyField("credential"))
        ));
    }

    #[test]
    fn test_endpoint_must_be_http() {
        let mut config = fixed(60);
        config.endpoint = "ftp://example.com".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint(_))
        ));

        config.endpoint = "not a url".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_rpm_bounds() {
        assert!(matches!(
            fixed(0).validate(),
            Err(ConfigError::InvalidRate(_))
        ));
        assert!(fixed(MAX_RPM).validate().is_ok());
        assert!(fixed(MAX_RPM + 1).validate().is_err());
    }

    #[test]
    fn test_ramp_validation() {
        let ramp = AutoRamp::new(100, 10, Duration::from_secs(1), 50);
        assert!(matches!(ramp.validate(), Err(ConfigError::InvalidRamp(_))));

        let ramp = AutoRamp::new(10, 10, Duration::ZERO, 50);
        assert!(ramp.validate().is_err());

        assert!(AutoRamp::default().validate().is_ok());
    }

    #[test]
    fn test_threshold_overrides_merge() {
        let defaults = EngineDefaults::default();
        let mut config = fixed(60);
        config.thresholds.max_consecutive_failures = Some(Threshold::Disabled);

        let resolved = config.thresholds(&defaults);
        assert_eq!(resolved.success_rate_floor, Threshold::Enabled(80.0));
        assert_eq!(resolved.max_consecutive_failures, Threshold::Disabled);
    }

    #[test]
    fn test_disabled_is_not_zero() {
        let zero: Threshold<u32> = Threshold::Enabled(0);
        assert!(zero.is_enabled());
        assert_eq!(zero.value(), Some(0));
        assert_eq!(Threshold::<u32>::Disabled.value(), None);
    }

    #[test]
    fn test_request_timeout_ignores_disabled_ceiling() {
        let defaults = EngineDefaults::default();
        assert_eq!(defaults.request_timeout(), Duration::from_secs(150));

        let defaults = EngineDefaults::default().with_thresholds(OverloadThresholds::disabled());
        assert_eq!(defaults.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_duration_limit_fixed_only() {
        let config = fixed(60).with_duration(Duration::from_secs(120));
        assert_eq!(config.duration_limit(), Some(Duration::from_secs(120)));

        let mut auto = config.clone();
        auto.rate = RateMode::Auto { ramp: None };
        assert_eq!(auto.duration_limit(), None);
    }

    #[test]
    fn test_auto_takes_engine_ramp() {
        let defaults = EngineDefaults::default();
        let mut config = fixed(60);
        config.rate = RateMode::Auto { ramp: None };
        assert_eq!(config.initial_rpm(&defaults), 10);
        assert_eq!(config.summary(&defaults).max_rpm, Some(1000));
    }

    #[test]
    fn test_session_config_from_toml() {
        let toml = r#"
            endpoint = "https://generativelanguage.googleapis.com"
            model = "gemini-1.5-flash"
            credential = "key"
            provider = "gemini"
            request_mode = "single_shot"
            duration = "10m"
            rate = { mode = "fixed", rpm = 30 }
            prompt = { policy = "random", candidates = ["Tell me a joke"] }

            [thresholds]
            success_rate_floor = "disabled"
            max_consecutive_failures = { enabled = 3 }
        "#;
        let config: SessionConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.provider, ProviderKind::Gemini);
        assert_eq!(config.request_mode, RequestMode::SingleShot);
        assert_eq!(config.duration, Some(Duration::from_secs(600)));
        assert_eq!(config.rate, RateMode::Fixed { rpm: 30 });
        assert_eq!(config.thresholds.success_rate_floor, Some(Threshold::Disabled));
        assert_eq!(
            config.thresholds.max_consecutive_failures,
            Some(Threshold::Enabled(3))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialized_config_has_no_credential() {
        let json = serde_json::to_string(&fixed(60)).unwrap();
        assert!(!json.contains("sk-test"));
        assert!(!format!("{:?}", fixed(60)).contains("sk-test"));
    }
}
