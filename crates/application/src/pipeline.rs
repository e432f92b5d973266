//! Ordered stages run around every command and query.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::DispatchError;
use crate::request::{RequestContext, RequestInfo};

/// A cross-cutting step of the request pipeline.
///
/// `before` runs in pipeline order and may short-circuit the request by
/// returning an error; later stages and the handler are then skipped.
/// `after` runs in reverse order once the request finished, whatever the
/// outcome.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn before(
        &self,
        _request: &RequestInfo<'_>,
        _ctx: &RequestContext,
    ) -> Result<(), DispatchError> {
        Ok(())
    }

    fn after(
        &self,
        _request: &RequestInfo<'_>,
        _ctx: &RequestContext,
        _error: Option<&DispatchError>,
        _elapsed: Duration,
    ) {
    }
}

/// Rejects requests whose fields fail their own shape checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationStage;

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn before(
        &self,
        request: &RequestInfo<'_>,
        _ctx: &RequestContext,
    ) -> Result<(), DispatchError> {
        request.validate().map_err(DispatchError::Validation)
    }
}

/// Requires a principal unless the request allows anonymous callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthorizationStage;

#[async_trait]
impl Stage for AuthorizationStage {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn before(
        &self,
        request: &RequestInfo<'_>,
        ctx: &RequestContext,
    ) -> Result<(), DispatchError> {
        if request.allows_anonymous || ctx.principal.is_some() {
            return Ok(());
        }
        Err(DispatchError::Unauthorized(format!(
            "{} {} requires a principal",
            request.kind.as_str(),
            request.name
        )))
    }
}

/// Emits one structured event per request and outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStage;

#[async_trait]
impl Stage for LoggingStage {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn before(
        &self,
        request: &RequestInfo<'_>,
        ctx: &RequestContext,
    ) -> Result<(), DispatchError> {
        tracing::debug!(
            kind = request.kind.as_str(),
            request = request.name,
            aggregate_id = ?request.aggregate_id,
            correlation_id = %ctx.correlation_id,
            principal = ctx.principal.as_ref().map(|p| p.as_str()),
            "request received"
        );
        Ok(())
    }

    fn after(
        &self,
        request: &RequestInfo<'_>,
        ctx: &RequestContext,
        error: Option<&DispatchError>,
        elapsed: Duration,
    ) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        match error {
            None => tracing::info!(
                kind = request.kind.as_str(),
                request = request.name,
                correlation_id = %ctx.correlation_id,
                elapsed_ms,
                "request completed"
            ),
            Some(e) => tracing::warn!(
                kind = request.kind.as_str(),
                request = request.name,
                correlation_id = %ctx.correlation_id,
                error_kind = e.kind(),
                error = %e,
                elapsed_ms,
                "request failed"
            ),
        }
    }
}

/// Built-in stages selectable by name in a [`PipelineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Logging,
    Authorization,
    Validation,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Logging => "logging",
            StageKind::Authorization => "authorization",
            StageKind::Validation => "validation",
        }
    }

    fn build(&self) -> Arc<dyn Stage> {
        match self {
            StageKind::Logging => Arc::new(LoggingStage),
            StageKind::Authorization => Arc::new(AuthorizationStage),
            StageKind::Validation => Arc::new(ValidationStage),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineConfigError {
    #[error("Unknown pipeline stage: {0}")]
    UnknownStage(String),

    #[error("Pipeline stage listed twice: {0}")]
    DuplicateStage(&'static str),
}

impl FromStr for StageKind {
    type Err = PipelineConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "logging" => Ok(StageKind::Logging),
            "authorization" => Ok(StageKind::Authorization),
            "validation" => Ok(StageKind::Validation),
            other => Err(PipelineConfigError::UnknownStage(other.to_string())),
        }
    }
}

/// Static stage order, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    stages: Vec<StageKind>,
}

impl PipelineConfig {
    pub fn new(stages: Vec<StageKind>) -> Result<Self, PipelineConfigError> {
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].contains(stage) {
                return Err(PipelineConfigError::DuplicateStage(stage.as_str()));
            }
        }
        Ok(Self { stages })
    }

    /// Parses a comma-separated list such as `"logging,authorization,validation"`.
    pub fn parse(list: &str) -> Result<Self, PipelineConfigError> {
        let stages = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(StageKind::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(stages)
    }

    pub fn stages(&self) -> &[StageKind] {
        &self.stages
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                StageKind::Logging,
                StageKind::Authorization,
                StageKind::Validation,
            ],
        }
    }
}

/// The stages of a dispatcher, in execution order.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Creates a pipeline with no stages.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            stages: config.stages().iter().map(StageKind::build).collect(),
        }
    }

    /// Appends a stage after the existing ones.
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub(crate) async fn before(
        &self,
        request: &RequestInfo<'_>,
        ctx: &RequestContext,
    ) -> Result<(), DispatchError> {
        for stage in &self.stages {
            stage.before(request, ctx).await?;
        }
        Ok(())
    }

    pub(crate) fn after(
        &self,
        request: &RequestInfo<'_>,
        ctx: &RequestContext,
        error: Option<&DispatchError>,
        elapsed: Duration,
    ) {
        for stage in self.stages.iter().rev() {
            stage.after(request, ctx, error, elapsed);
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
