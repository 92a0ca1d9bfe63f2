pub mod config;
pub mod error;
pub mod inference;
pub mod orchestrator;
pub mod pipeline;
pub mod runtime;
pub mod session;
pub mod tokenizer;

// Re-exports for convenience
pub use config::Config;
pub use error::{CellioError, Result};
pub use orchestrator::{GenerationEvent, GenerationOrchestrator, GenerationStatus};
pub use pipeline::GenerationPipeline;
pub use session::{Author, JsonFileStore, Message, Session, SessionId};
