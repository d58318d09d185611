use std::env;
use std::str::FromStr;

use crate::error::EffectError;

/// What happens when an event type that is already registered is registered again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegistrationPolicy {
    /// The new registration fails; the existing one stays.
    #[default]
    Reject,
    /// The new registration wins; a displaced one-shot waiter completes with
    /// `EffectError::Superseded`.
    Replace,
}

impl FromStr for RegistrationPolicy {
    type Err = EffectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(RegistrationPolicy::Reject),
            "replace" => Ok(RegistrationPolicy::Replace),
            other => Err(EffectError::Config(format!(
                "unknown registration policy `{other}` (expected `reject` or `replace`)"
            ))),
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub registration_policy: RegistrationPolicy,
    /// Log every event nobody claimed at debug level.
    pub log_unhandled: bool,
}

impl EngineConfig {
    /// Load configuration from environment variables. Unset vars fall back to defaults.
    pub fn from_env() -> Result<Self, EffectError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EffectError> {
        let registration_policy = match lookup("TAKEFLOW_REGISTRATION_POLICY") {
            Some(v) => v.parse()?,
            None => RegistrationPolicy::default(),
        };
        let log_unhandled = match lookup("TAKEFLOW_LOG_UNHANDLED") {
            Some(v) => v.trim().parse::<bool>().map_err(|_| {
                EffectError::Config(format!("TAKEFLOW_LOG_UNHANDLED must be true or false, got `{v}`"))
            })?,
            None => false,
        };

        Ok(Self {
            registration_policy,
            log_unhandled,
        })
    }

    pub fn with_policy(mut self, policy: RegistrationPolicy) -> Self {
        self.registration_policy = policy;
        self
    }

    pub fn with_log_unhandled(mut self, enabled: bool) -> Self {
        self.log_unhandled = enabled;
        self
    }
}
