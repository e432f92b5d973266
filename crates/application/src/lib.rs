//! Application core: routes commands and queries to handlers, persists
//! aggregates with their outbox messages in one transaction and hands the
//! committed events to in-process handlers.
//!
//! A command flows through the configured [`Pipeline`], is executed by its
//! [`CommandHandler`] against the loaded aggregate, and is committed through
//! a [`store::UnitOfWork`]. Handler failures after the commit are reported
//! in a [`DeliveryReport`] and never undo the write.

pub mod account;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
pub mod persistence;
pub mod pipeline;
pub mod propagation;
pub mod relay;
pub mod request;
pub mod retry;

pub use account::{
    AccountCommandHandler, AccountDetails, CloseAccount, DepositFunds, FreezeAccount, GetAccount,
    GetAccountHandler, OpenAccount, UnfreezeAccount, WithdrawFunds, register_account_handlers,
};
pub use config::{ConfigError, DispatcherConfig};
pub use dispatcher::{Dispatched, Dispatcher, DispatcherBuilder};
pub use error::{AGGREGATE_ALREADY_EXISTS, DispatchError, FieldError, ValidationErrors};
pub use events::{
    DeliveryMode, DeliveryReport, DeliverySlot, EventDispatcher, EventHandler,
    HandlerDeliveryFailure, HandlerError,
};
pub use handler::{CommandHandler, QueryHandler, require_absent, require_existing};
pub use persistence::load_aggregate;
pub use pipeline::{
    AuthorizationStage, LoggingStage, Pipeline, PipelineConfig, PipelineConfigError, Stage,
    StageKind, ValidationStage,
};
pub use propagation::PropagationConfig;
pub use relay::{LogPublisher, OutboxRelay, PublishError, Publisher, RelayError, RelayOptions};
pub use request::{
    Ack, Command, Principal, Query, RequestContext, RequestInfo, RequestKind, Validate,
};
pub use retry::retry_on_conflict;
