//! Agent orchestration core for Concierge.
//!
//! This crate implements the reasoning backbone of Concierge: queries come
//! in, get classified and routed, run through a bounded think/act/observe
//! loop against a tiered model ladder, and come out as composed answers
//! with exact cost accounting.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐    ┌──────────────┐    ┌───────────────┐
//! │ Router │───>│   Engine     │───>│ Tool Executor │
//! │(triage)│    │ (step loop)  │    │ (validated)   │
//! └────────┘    └──────┬───────┘    └───────────────┘
//!                      │
//!               ┌──────┴───────┐
//!               │    Gateway   │
//!               │ (tier ladder)│
//!               └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`gateway`] -- Tiered model access with fallback and cost accounting.
//! - [`tools`] -- Tool trait, registry, and the validating executor.
//! - [`engine`] -- The bounded reasoning loop and answer composition.
//! - [`router`] -- Query classification into strategy, tier, and tool set.
//! - [`core`] -- The assembled [`AgentCore`] entry points.
//! - [`config`] -- TOML configuration with hot reload.
//! - [`sink`] -- Write-only persistence of finalized runs.
//! - [`error`] -- The core error taxonomy.

pub mod chat;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod query;
pub mod router;
pub mod sink;
pub mod tools;
pub mod usage;

// Re-export the most commonly used types at the crate root.
pub use chat::{ChatRequest, Message, Role, ToolCall, ToolDefinition};
pub use config::{ConfigHandle, CoreConfig};
pub use crate::core::{AgentCore, Answered, CoreFailure};
pub use engine::{
    Citation, EngineConfig, FinalAnswer, ReasoningEngine, ReasoningState, ReasoningStep,
    StepAction, StepStatus, compose_answer,
};
pub use error::{CoreError, ErrorKind, Result};
pub use gateway::{
    GatewayFailure, GatewayResponse, HttpTransport, ModelGateway, ModelReply, ModelTier,
    ModelTransport, Provider, TierCapabilities, TierTable, TransportError, TransportReply,
};
pub use query::{MediaRef, Query, UserTier};
pub use router::{Classifier, Complexity, HeuristicClassifier, Router, RoutingDecision, Strategy};
pub use sink::{JsonlSink, PersistenceSink, RunRecord, TracingSink};
pub use tools::{Tool, ToolExecutor, ToolRegistry, ToolResult};
pub use usage::{TokenUsage, UsageLedger, UsageTotals};
