//! Conversation answering: tools over the graph and the selected documents,
//! sub-question decomposition, and the tool-calling agent loop.

pub mod agent;
pub mod engine;
pub mod financials;
pub mod history;
pub mod router;
pub mod sub_question;
pub mod synth;
pub mod tools;
pub mod types;

pub use agent::{AgentLoop, AgentResponse, ChatEvent, EventSink, ToolInvocation};
pub use engine::{build_system_prompt, ChatEngine};
pub use financials::{describe_financials, FinancialDataSource, JsonFinancialDataSource, StockFinancials};
pub use history::build_history;
pub use router::ToolRouter;
pub use sub_question::{SubQuestion, SubQuestionQueryEngine};
pub use synth::RefineSynthesizer;
pub use tools::{QueryEngine, QueryResponse, Tool};
pub use types::{Conversation, Document, Message, MessageRole, MessageStatus, SecDocumentMetadata, SecDocumentType};
