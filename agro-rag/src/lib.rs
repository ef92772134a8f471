pub mod cli;
pub mod error;
pub mod logging;
pub mod paths;
pub mod protocol;
pub mod rag;
pub mod settings;

#[cfg(test)]
mod tests;

pub use error::{RagError, Result};
pub use protocol::{ChatReply, HistoryTurn, Source};
pub use rag::RetrievalEngine;
pub use settings::RagSettings;
