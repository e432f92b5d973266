//! Static dispatcher configuration loaded from environment variables.

use store::UnitOfWork;
use thiserror::Error;

use crate::dispatcher::DispatcherBuilder;
use crate::events::{DeliveryMode, EventDispatcher};
use crate::pipeline::{Pipeline, PipelineConfig, PipelineConfigError};
use crate::propagation::PropagationConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {var}: {source}")]
    Pipeline {
        var: &'static str,
        #[source]
        source: PipelineConfigError,
    },

    #[error("Invalid {var}: expected one of {expected}, got {value:?}")]
    InvalidValue {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Startup configuration of a [`crate::Dispatcher`].
///
/// Reads from environment variables:
/// - `PIPELINE_STAGES`: comma separated stage order (default: `"logging,authorization,validation"`)
/// - `PROPAGATED_EVENTS`: `"*"` or a comma separated list of event types
///   written to the outbox (default: none)
/// - `EVENT_DELIVERY`: `"inline"` or `"background"` (default: `"inline"`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub pipeline: PipelineConfig,
    pub propagation: PropagationConfig,
    pub delivery: DeliveryMode,
}

impl DispatcherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let pipeline = match lookup("PIPELINE_STAGES") {
            Some(list) => PipelineConfig::parse(&list).map_err(|source| ConfigError::Pipeline {
                var: "PIPELINE_STAGES",
                source,
            })?,
            None => PipelineConfig::default(),
        };

        let propagation = lookup("PROPAGATED_EVENTS")
            .map(|list| PropagationConfig::parse(&list))
            .unwrap_or_default();

        let delivery = match lookup("EVENT_DELIVERY").as_deref().map(str::trim) {
            None | Some("inline") => DeliveryMode::Inline,
            Some("background") => DeliveryMode::Background,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    var: "EVENT_DELIVERY",
                    expected: "inline, background",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            pipeline,
            propagation,
            delivery,
        })
    }

    /// An event dispatcher in the configured delivery mode, without handlers.
    pub fn event_dispatcher(&self) -> EventDispatcher {
        EventDispatcher::new(self.delivery)
    }

    /// Applies the stage order and propagation filter to a builder.
    pub fn apply<U: UnitOfWork>(&self, builder: DispatcherBuilder<U>) -> DispatcherBuilder<U> {
        builder
            .pipeline(Pipeline::from_config(&self.pipeline))
            .propagation(self.propagation.clone())
    }
}
