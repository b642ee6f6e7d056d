//! Client configuration loaded from environment variables.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use studio_core::generation::GenerateRequest;
use studio_core::preferences::{normalize_engine_url, Preferences, PromptMode};
use studio_core::structured_prompt::{DEFAULT_NEGATIVE_PROMPT, DEFAULT_SYSTEM_PROMPT};
use studio_engine::client::ws_url_from_api_base;
use studio_engine::reconnect::ReconnectPolicy;
use studio_session::orchestrator::OrchestratorConfig;

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000/api";

/// Errors raised while reading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the client needs to run one generation.
///
/// All fields have defaults suitable for a local backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP API base including the `/api` prefix.
    pub api_base_url: String,
    /// Event channel endpoint.
    pub ws_url: String,
    pub preferences: Preferences,
    pub negative_prompt: String,
    pub poll_interval: Duration,
    pub generation_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg: f32,
    /// `-1` lets the engine choose.
    pub seed: i64,
    pub sampler_name: String,
    pub scheduler: String,
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                          |
    /// |---------------------------|----------------------------------|
    /// | `API_BASE_URL`            | `http://127.0.0.1:3000/api`      |
    /// | `WS_URL`                  | derived from `API_BASE_URL`      |
    /// | `ENGINE_URL`              | `http://127.0.0.1:8188`          |
    /// | `PROMPT_MODE`             | `normal`                         |
    /// | `SYSTEM_PROMPT`           | built-in system prompt           |
    /// | `NEGATIVE_PROMPT`         | built-in negative prompt         |
    /// | `CAPTION`                 | empty                            |
    /// | `POLL_INTERVAL_MS`        | `1000`                           |
    /// | `GENERATION_TIMEOUT_SECS` | `300`                            |
    /// | `RECONNECT_INTERVAL_MS`   | `3000`                           |
    /// | `MAX_RECONNECT_ATTEMPTS`  | `10`                             |
    /// | `IMAGE_WIDTH`             | `1024`                           |
    /// | `IMAGE_HEIGHT`            | `1536`                           |
    /// | `STEPS`                   | `28`                             |
    /// | `CFG`                     | `4.5`                            |
    /// | `SEED`                    | `-1`                             |
    /// | `SAMPLER`                 | `res_multistep`                  |
    /// | `SCHEDULER`               | `linear_quadratic`               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());
        let defaults = GenerateRequest::new(String::new());

        let api_base_url = text("API_BASE_URL", DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let ws_url = lookup("WS_URL").unwrap_or_else(|| ws_url_from_api_base(&api_base_url));

        let mut preferences = Preferences {
            prompt_mode: PromptMode::parse(&text("PROMPT_MODE", "normal")),
            system_prompt: text("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
            caption: text("CAPTION", ""),
            ..Preferences::default()
        };
        if let Some(url) = lookup("ENGINE_URL") {
            preferences.set_engine_url(&url);
        }

        let policy = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            interval: Duration::from_millis(parse_var(
                &lookup,
                "RECONNECT_INTERVAL_MS",
                policy.interval.as_millis() as u64,
            )?),
            max_attempts: parse_var(&lookup, "MAX_RECONNECT_ATTEMPTS", policy.max_attempts)?,
        };

        let orchestrator = OrchestratorConfig::default();
        let poll_interval_ms = parse_var(
            &lookup,
            "POLL_INTERVAL_MS",
            orchestrator.poll_interval.as_millis() as u64,
        )?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_MS",
                value: poll_interval_ms.to_string(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            api_base_url,
            ws_url,
            preferences,
            negative_prompt: text("NEGATIVE_PROMPT", DEFAULT_NEGATIVE_PROMPT),
            poll_interval: Duration::from_millis(poll_interval_ms),
            generation_timeout: Duration::from_secs(parse_var(
                &lookup,
                "GENERATION_TIMEOUT_SECS",
                orchestrator.deadline.as_secs(),
            )?),
            reconnect,
            width: parse_var(&lookup, "IMAGE_WIDTH", defaults.width)?,
            height: parse_var(&lookup, "IMAGE_HEIGHT", defaults.height)?,
            steps: parse_var(&lookup, "STEPS", defaults.steps)?,
            cfg: parse_var(&lookup, "CFG", defaults.cfg)?,
            seed: parse_var(&lookup, "SEED", defaults.seed)?,
            sampler_name: text("SAMPLER", &defaults.sampler_name),
            scheduler: text("SCHEDULER", &defaults.scheduler),
        })
    }

    /// Timing for the orchestrator.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: self.poll_interval,
            deadline: self.generation_timeout,
        }
    }

    /// A request carrying `prompt` and the configured sampling parameters.
    pub fn generate_request(&self, prompt: String) -> GenerateRequest {
        GenerateRequest {
            prompt,
            negative_prompt: self.negative_prompt.clone(),
            width: self.width,
            height: self.height,
            steps: self.steps,
            cfg: self.cfg,
            seed: self.seed,
            sampler_name: self.sampler_name.clone(),
            scheduler: self.scheduler.clone(),
        }
    }

    /// The engine address, normalized.
    pub fn engine_url(&self) -> String {
        normalize_engine_url(&self.preferences.engine_url)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use studio_core::preferences::DEFAULT_ENGINE_URL;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.ws_url, "ws://127.0.0.1:3000/ws");
        assert_eq!(config.preferences.engine_url, DEFAULT_ENGINE_URL);
        assert_eq!(config.preferences.prompt_mode, PromptMode::Normal);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.generation_timeout, Duration::from_secs(300));
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!((config.width, config.height), (1024, 1536));
        assert_eq!(config.seed, -1);
        assert_eq!(config.sampler_name, "res_multistep");
        assert_eq!(config.negative_prompt, DEFAULT_NEGATIVE_PROMPT);
    }

    #[test]
    fn ws_url_follows_secure_api_base() {
        let config = load(&[("API_BASE_URL", "https://studio.example.com/api/")]).unwrap();
        assert_eq!(config.api_base_url, "https://studio.example.com/api");
        assert_eq!(config.ws_url, "wss://studio.example.com/ws");
    }

    #[test]
    fn explicit_ws_url_wins() {
        let config = load(&[("WS_URL", "ws://elsewhere:9000/events")]).unwrap();
        assert_eq!(config.ws_url, "ws://elsewhere:9000/events");
    }

    #[test]
    fn engine_url_is_normalized() {
        let config = load(&[("ENGINE_URL", "gpu-box:8188/")]).unwrap();
        assert_eq!(config.engine_url(), "http://gpu-box:8188");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("PROMPT_MODE", "structured"),
            ("STEPS", "40"),
            ("CFG", "6.5"),
            ("SEED", "1234"),
            ("MAX_RECONNECT_ATTEMPTS", "2"),
            ("POLL_INTERVAL_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.preferences.prompt_mode, PromptMode::Structured);
        assert_eq!(config.steps, 40);
        assert!((config.cfg - 6.5).abs() < f32::EPSILON);
        assert_eq!(config.seed, 1234);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.orchestrator_config().poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn invalid_number_is_an_error() {
        assert_matches!(
            load(&[("IMAGE_WIDTH", "wide")]),
            Err(ConfigError::Invalid { var: "IMAGE_WIDTH", .. })
        );
    }

    #[test]
    fn zero_poll_interval_is_an_error() {
        assert_matches!(
            load(&[("POLL_INTERVAL_MS", "0")]),
            Err(ConfigError::Invalid { var: "POLL_INTERVAL_MS", .. })
        );
    }

    #[test]
    fn request_carries_configured_parameters() {
        let config = load(&[("STEPS", "12")]).unwrap();
        let request = config.generate_request("1girl".into());
        assert_eq!(request.prompt, "1girl");
        assert_eq!(request.steps, 12);
        assert!(request.validate().is_ok());
    }
}
