//! Commands, queries and the context they travel with.

use common::{AggregateId, Version};
use domain::AggregateRoot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ValidationErrors;

/// Shape checks run by [`crate::ValidationStage`] before any handler.
///
/// Only checks that need no stored state belong here; everything that
/// depends on the aggregate is a domain rule.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// An intent to change exactly one aggregate.
///
/// Commands are immutable values. They are acknowledged with an [`Ack`],
/// never with data.
pub trait Command: Validate + Send + Sync + 'static {
    /// The aggregate this command targets.
    type Aggregate: AggregateRoot;

    /// Name used in logs, metrics and stage decisions.
    const NAME: &'static str;

    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;

    /// Whether the command may run without a principal.
    fn allows_anonymous(&self) -> bool {
        false
    }
}

/// A read-only request returning a projection.
pub trait Query: Validate + Send + Sync + 'static {
    /// The data returned to the caller.
    type Projection: Send + 'static;

    const NAME: &'static str;

    fn allows_anonymous(&self) -> bool {
        false
    }
}

/// Acknowledgement of a committed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub aggregate_id: AggregateId,
    /// Version of the aggregate after the commit.
    pub version: Version,
}

/// Identity of the caller, as established by the outer layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-request data passed alongside a command or query.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Option<Principal>,
    /// Copied into the metadata of every event the request produces.
    pub correlation_id: Uuid,
    /// Honored until the commit; ignored afterwards.
    pub cancellation: CancellationToken,
}

impl RequestContext {
    /// Creates a context without a principal.
    pub fn anonymous() -> Self {
        Self {
            principal: None,
            correlation_id: Uuid::new_v4(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn for_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(Principal::new(principal)),
            ..Self::anonymous()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Command,
    Query,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Command => "command",
            RequestKind::Query => "query",
        }
    }
}

/// Type-erased view of a request as seen by pipeline stages.
#[derive(Clone, Copy)]
pub struct RequestInfo<'a> {
    pub kind: RequestKind,
    pub name: &'static str,
    pub aggregate_id: Option<AggregateId>,
    pub allows_anonymous: bool,
    pub(crate) request: &'a (dyn Validate + Sync),
}

impl<'a> RequestInfo<'a> {
    pub fn command<C: Command>(command: &'a C) -> Self {
        Self {
            kind: RequestKind::Command,
            name: C::NAME,
            aggregate_id: Some(command.aggregate_id()),
            allows_anonymous: command.allows_anonymous(),
            request: command,
        }
    }

    pub fn query<Q: Query>(query: &'a Q) -> Self {
        Self {
            kind: RequestKind::Query,
            name: Q::NAME,
            aggregate_id: None,
            allows_anonymous: query.allows_anonymous(),
            request: query,
        }
    }

    /// Runs the request's own shape checks.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        self.request.validate()
    }
}

impl std::fmt::Debug for RequestInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestInfo")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("aggregate_id", &self.aggregate_id)
            .field("allows_anonymous", &self.allows_anonymous)
            .finish()
    }
}
