pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod reassembler;
pub mod registry;
pub mod transfer;

pub use agent::{AgentConfig, AgentSender};
pub use api::{create_router, AppState};
pub use config::AppConfig;
pub use error::{Result, UplinkError};
pub use orchestrator::TransferOrchestrator;
pub use protocol::{AgentMessage, ServerMessage};
pub use registry::{ConnectionRegistry, RegistryEvent};
pub use transfer::{TransferSnapshot, TransferStatus};
