//! Tunable constants and the difficulty scale.

use std::time::Duration;

/// Difficulty levels exposed to the user.
pub const DIFFICULTY_MIN: u8 = 1;
pub const DIFFICULTY_MAX: u8 = 10;

/// Native skill scale of the engine (UCI "Skill Level" goes 0..=20).
pub const ENGINE_SKILL_MAX: u8 = 20;

/// Hard cap on search depth for best-move requests.
pub const BEST_MOVE_DEPTH_CAP: u32 = 15;

/// Depth used for continuous background analysis.
pub const ANALYSIS_DEPTH: u32 = 18;

/// How long a best-move request may run before it resolves with no move.
pub const BEST_MOVE_TIMEOUT: Duration = Duration::from_secs(15);

/// Debounce window applied before an analysis search is actually started.
pub const ANALYSIS_DEBOUNCE: Duration = Duration::from_millis(50);

/// Pause between an accepted player move and the engine reply request.
pub const ENGINE_REPLY_DELAY: Duration = Duration::from_millis(200);

/// Per-position time budget for post-game scoring.
pub const SCORING_MOVETIME_MS: u64 = 1000;

/// Extra slack granted on top of the movetime before a scoring request
/// is abandoned.
pub const SCORING_GRACE: Duration = Duration::from_secs(2);

/// Centipawn value used when folding a mate-in-n score onto the cp axis.
pub const MATE_CP_CEILING: i32 = 10_000;

/// Engine configuration derived from a 1-10 difficulty level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyConfig {
    /// Value for the engine's native skill option (0..=20).
    pub skill_level: u8,
    /// Depth limit for best-move searches at this level.
    pub depth: u32,
}

/// Map a 1-10 difficulty level onto the engine's native scales.
///
/// Both components are non-decreasing in `level`; out-of-range input is
/// clamped rather than rejected.
pub fn difficulty_config(level: u8) -> DifficultyConfig {
    let level = level.clamp(DIFFICULTY_MIN, DIFFICULTY_MAX);
    let skill_level =
        ((f64::from(level) - 1.0) * f64::from(ENGINE_SKILL_MAX) / 9.0).round() as u8;
    let depth = (u32::from(level) + 2).min(BEST_MOVE_DEPTH_CAP);
    DifficultyConfig { skill_level, depth }
}
