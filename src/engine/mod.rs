//! Adapter around an external line-oriented search engine process.

pub mod protocol;
pub mod session;
pub mod transport;

pub use protocol::{AnalysisInfo, EvalResult, Score};
pub use session::{AnalysisUpdate, EngineSession, SessionState};

use async_trait::async_trait;

/// Engine session failures. None of these are fatal to the match; callers
/// degrade to playing without engine assistance.
#[derive(Debug)]
pub enum EngineError {
    /// The engine process could not be spawned or never completed the
    /// handshake.
    StartupFailed(String),
    /// The session has been closed; the operation was not attempted.
    Closed,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::StartupFailed(msg) => write!(f, "engine startup failed: {}", msg),
            EngineError::Closed => write!(f, "engine session is closed"),
        }
    }
}

impl std::error::Error for EngineError {}

/// The engine surface the orchestrator depends on. Implemented by
/// [`EngineSession`]; tests substitute a scripted double.
///
/// All failures degrade to `None`; the orchestrator decides whether to
/// retry or carry on without a result.
#[async_trait]
pub trait EngineBackend: Send + Sync {
    /// Single best-move query at the given difficulty level.
    async fn best_move(&self, fen: &str, level: u8) -> Option<String>;

    /// One-shot fixed-time evaluation used for post-game scoring.
    async fn score_position(&self, fen: &str, movetime_ms: u64) -> Option<EvalResult>;

    /// Configure the engine for a 1-10 difficulty level.
    fn set_strength(&self, level: u8);

    /// Begin (or restart) continuous analysis of a position.
    fn start_analysis(&self, fen: &str, max_depth: u32);

    /// Stop any running analysis.
    fn stop_analysis(&self);
}
