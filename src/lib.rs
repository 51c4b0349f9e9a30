// src/lib.rs

// Import the top-level `qaforge` module.
pub mod qaforge;

// Re-exporting key items for easier external access.
pub use qaforge::execution::{AgentExecution, AgentKind, ExecutionStatus};
pub use qaforge::executor::{AgentExecutor, ExecutorConfig, StartAgentRequest};
pub use qaforge::gateway::LlmGateway;
pub use qaforge::intent::TestIntent;

// Flatten the module path for the rest of the public surface: external
// code addresses qaforge::approval::…, qaforge::store::…, etc.
pub use qaforge::{
    agents, approval, cancel, circuit_breaker, collab, config, dispatcher, element_registry,
    event, execution, executor, gateway, intent, llm_provider, planner, store, tool_protocol,
    tools,
};
