//! Triage Desk - 入站消息分诊与有界 AI 支持会话管理

pub mod ai;
pub mod config;
pub mod daemon;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod state;
pub mod transport;
pub mod triage;

pub use ai::{ChatClient, ChatMessage, ChatProvider, Completion, Role, ScriptedProvider, TokenUsage};
pub use config::TriageConfig;
pub use daemon::TriageService;
pub use error::{ProviderError, TransportError};
pub use ledger::{CostLedger, CostRates, CostTotals};
pub use orchestrator::{HandleOutcome, LocationState, SessionOrchestrator};
pub use persistence::{PersistenceManager, Snapshot};
pub use registry::{ChannelRegistry, RegistryChange};
pub use session::{SessionInfo, SessionStore};
pub use state::SharedState;
pub use transport::{InboundMessage, MemoryTransport, StdioTransport, Transport, TransportEvent};
pub use triage::{Decision, TriageEngine, TriageOutcome};
