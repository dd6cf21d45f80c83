//! Delegated runs: profiles, task records, the question bridge and the coordinator

pub mod bridge;
pub mod coordinator;
pub mod profile;
pub mod tasks;

pub use bridge::QuestionBridge;
pub use coordinator::{
    ChatReply, LaunchReceipt, RunResult, SubagentCoordinator, SubagentPhase, ASK_TOOL,
    DELEGATION_TOOL, OUTBOUND_TOOL,
};
pub use profile::AgentProfile;
pub use tasks::{Task, TaskRegistry, TaskStatus};
