//! Sequencing of moves, engine replies, analysis restarts and post-game
//! scoring across MatchState, Timeline and the engine backend.
//!
//! All methods run on one logical task. Deferred work (the delayed engine
//! reply, the scoring loop) is guarded by generation tickets or a
//! cooperative cancel flag so any state-invalidating transition (new
//! game, resign, take-back, load) reliably cancels it.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chess::{Board, Color};
use log::{info, warn};
use uuid::Uuid;

use crate::config::{ANALYSIS_DEPTH, ENGINE_REPLY_DELAY, SCORING_MOVETIME_MS};
use crate::engine::{AnalysisUpdate, EngineBackend};
use crate::game::rules::{MoveResult, MoveSpec};
use crate::game::timeline::TimelineView;
use crate::game::{MatchState, Phase, Timeline, Winner};
use crate::models::records::{
    color_from_string, color_to_string, SaveRecord, SAVE_KEY,
};
use crate::models::store::KvStore;

/// Outcome of a player move attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Rejected by the rules engine; nothing changed.
    Illegal,
    /// No match is in progress.
    NotPlaying,
    /// The timeline is in replay mode; return to live first.
    Replaying,
    /// It is the engine's turn.
    NotYourTurn,
    /// Move accepted; an engine reply has been scheduled.
    Played(MoveResult),
    /// Move accepted and it ended the game.
    GameOver(MoveResult, Winner),
}

/// Outcome of driving a scheduled engine reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineReply {
    /// No reply is scheduled.
    NotScheduled,
    /// The schedule was invalidated while waiting.
    Cancelled,
    /// The engine declined or timed out; the turn stays with the engine.
    NoMove,
    /// The engine moved.
    Played(MoveResult),
    /// The engine moved and ended the game.
    GameOver(MoveResult, Winner),
}

/// Handle for cancelling a running scoring loop from outside the
/// orchestrator task.
#[derive(Debug, Clone)]
pub struct ScoringCancel(Arc<AtomicBool>);

impl ScoringCancel {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct Orchestrator<E: EngineBackend> {
    match_state: MatchState,
    timeline: Timeline,
    engine: E,
    match_id: Uuid,
    /// Ticket for the scheduled engine reply; any bump of the generation
    /// cancels it.
    pending_reply: Option<u64>,
    reply_generation: u64,
    scoring_cancel: Arc<AtomicBool>,
}

impl<E: EngineBackend> Orchestrator<E> {
    pub fn new(engine: E) -> Self {
        Orchestrator {
            match_state: MatchState::new(),
            timeline: Timeline::new(),
            engine,
            match_id: Uuid::new_v4(),
            pending_reply: None,
            reply_generation: 0,
            scoring_cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn match_state(&self) -> &MatchState {
        &self.match_state
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn has_scheduled_engine_reply(&self) -> bool {
        self.pending_reply.is_some()
    }

    /// Begin a match. Also used for an in-place restart.
    pub fn start_game(&mut self, color: Color, difficulty: u8) {
        self.cancel_engine_reply();
        self.scoring_cancel.store(true, Ordering::SeqCst);
        self.match_state.start_game(color, difficulty);
        self.match_id = Uuid::new_v4();
        self.timeline.clear();
        self.timeline.set_initial(self.match_state.fen());
        self.engine.set_strength(difficulty);
        self.engine.start_analysis(&self.match_state.fen(), ANALYSIS_DEPTH);
        if !self.match_state.is_player_turn() {
            self.schedule_engine_reply();
        }
        info!(
            "match {} started: player {} at difficulty {}",
            self.match_id,
            color_to_string(color),
            difficulty
        );
    }

    /// Restart with the configuration of the previous match.
    pub fn rematch(&mut self) {
        let color = self.match_state.last_color();
        let difficulty = self.match_state.last_difficulty();
        self.start_game(color, difficulty);
    }

    /// Abandon the match and return to setup.
    pub fn new_game(&mut self) {
        self.cancel_engine_reply();
        self.scoring_cancel.store(true, Ordering::SeqCst);
        self.engine.stop_analysis();
        self.match_state.new_game();
        self.timeline.clear();
    }

    /// Validate and apply a player move. On success it is recorded and,
    /// unless the game ended, an engine reply is scheduled. Analysis is
    /// deliberately not restarted before the reply: the position is about
    /// to change again.
    pub fn play_move(&mut self, spec: MoveSpec) -> PlayOutcome {
        if self.match_state.phase() != Phase::Playing {
            return PlayOutcome::NotPlaying;
        }
        if !self.timeline.is_live() {
            return PlayOutcome::Replaying;
        }
        if !self.match_state.is_player_turn() {
            return PlayOutcome::NotYourTurn;
        }
        let result = match self.match_state.apply_move(spec) {
            Some(result) => result,
            None => return PlayOutcome::Illegal,
        };
        self.timeline.record(result.san.clone(), result.fen.clone());

        if self.match_state.phase() == Phase::Over {
            self.cancel_engine_reply();
            self.engine.stop_analysis();
            let winner = self.match_state.winner().unwrap_or(Winner::Draw);
            return PlayOutcome::GameOver(result, winner);
        }
        self.schedule_engine_reply();
        PlayOutcome::Played(result)
    }

    /// Drive the scheduled engine reply: wait out the delay, request a
    /// best move and apply it. A `None` from the engine leaves the turn
    /// with the engine; [`retry_engine_move`] re-arms the schedule.
    ///
    /// [`retry_engine_move`]: Orchestrator::retry_engine_move
    pub async fn engine_reply(&mut self) -> EngineReply {
        let ticket = match self.pending_reply {
            Some(ticket) => ticket,
            None => return EngineReply::NotScheduled,
        };
        tokio::time::sleep(ENGINE_REPLY_DELAY).await;
        if self.pending_reply != Some(ticket) || self.match_state.phase() != Phase::Playing {
            return EngineReply::Cancelled;
        }
        self.pending_reply = None;

        self.engine.stop_analysis();
        let fen = self.match_state.fen();
        let reply = self.engine.best_move(&fen, self.match_state.difficulty()).await;
        if self.match_state.phase() != Phase::Playing {
            return EngineReply::Cancelled;
        }

        let spec = match reply.as_deref().and_then(MoveSpec::from_uci) {
            Some(spec) => spec,
            None => {
                warn!("engine produced no move; the turn remains with the engine");
                return EngineReply::NoMove;
            }
        };
        let result = match self.match_state.apply_move(spec) {
            Some(result) => result,
            None => {
                warn!("engine proposed an illegal move: {}", spec.to_uci());
                return EngineReply::NoMove;
            }
        };
        self.timeline.record(result.san.clone(), result.fen.clone());

        if self.match_state.phase() == Phase::Over {
            self.engine.stop_analysis();
            let winner = self.match_state.winner().unwrap_or(Winner::Draw);
            return EngineReply::GameOver(result, winner);
        }
        self.engine.start_analysis(&result.fen, ANALYSIS_DEPTH);
        EngineReply::Played(result)
    }

    /// Re-arm the engine reply after a `NoMove`.
    pub fn retry_engine_move(&mut self) {
        if self.match_state.phase() == Phase::Playing && !self.match_state.is_player_turn() {
            self.schedule_engine_reply();
        }
    }

    /// Streamed analysis update from the engine. Discarded when no match
    /// is being played or when the update was computed for a position
    /// other than the current one, so a late callback can never describe
    /// a stale position or overwrite the outcome of a finished game.
    pub fn apply_analysis(&mut self, update: &AnalysisUpdate) {
        if self.match_state.phase() != Phase::Playing {
            log::debug!("discarding analysis update after game end");
            return;
        }
        if update.fen != self.match_state.fen() {
            log::debug!("discarding analysis update for a superseded position");
            return;
        }
        self.match_state.set_analysis_snapshot(&update.info);
    }

    /// Take back the player's last move: one ply if the engine was to
    /// move, two if the engine had already replied, so the player is
    /// always left to move again. Refused when the player has not moved
    /// yet, e.g. right after the engine's opening ply.
    pub fn take_back(&mut self) -> bool {
        if self.match_state.phase() != Phase::Playing || !self.timeline.is_live() {
            return false;
        }
        let plies = if self.match_state.is_player_turn() { 2 } else { 1 };
        if self.timeline.ply_count() < plies {
            return false;
        }
        self.cancel_engine_reply();
        self.engine.stop_analysis();

        for _ in 0..plies {
            if self.match_state.undo_last_ply() {
                self.timeline.undo_last();
            }
        }
        // Any memoized score series no longer matches the shortened game.
        self.match_state.clear_analysis_results();
        self.engine.start_analysis(&self.match_state.fen(), ANALYSIS_DEPTH);
        true
    }

    /// Resign on behalf of the player. Immediate transition to Over; the
    /// scheduled engine reply and analysis are cancelled first.
    pub fn resign(&mut self) {
        if self.match_state.phase() != Phase::Playing {
            return;
        }
        self.cancel_engine_reply();
        self.engine.stop_analysis();
        self.match_state.resign(self.match_state.player_color());
    }

    /// Score every recorded position of the finished game with a fixed
    /// per-move time budget, normalized to white's perspective. The
    /// series is memoized; a repeat call returns it without touching the
    /// engine. Returns `None` when cancelled or not applicable.
    pub async fn score_game(
        &mut self,
        mut progress: impl FnMut(usize, usize),
    ) -> Option<Vec<i32>> {
        if self.match_state.phase() != Phase::Over {
            return None;
        }
        if let Some(cached) = self.match_state.analysis_results() {
            info!("returning memoized game scores");
            return Some(cached.to_vec());
        }

        self.scoring_cancel.store(false, Ordering::SeqCst);
        let fens: Vec<String> =
            self.timeline.entries().iter().map(|entry| entry.fen.clone()).collect();
        let total = fens.len();
        let mut series = Vec::with_capacity(total);

        for (index, fen) in fens.iter().enumerate() {
            if self.scoring_cancel.load(Ordering::SeqCst) {
                info!("game scoring cancelled before position {}", index);
                return None;
            }
            let result = self.engine.score_position(fen, SCORING_MOVETIME_MS).await;
            if self.scoring_cancel.load(Ordering::SeqCst) {
                info!("game scoring cancelled after position {}", index);
                return None;
            }
            let cp = match result {
                Some(eval) => eval.score.as_centipawns(),
                None => {
                    warn!("no evaluation for position {}; recording 0", index);
                    0
                }
            };
            // Engine scores are relative to the side to move.
            let white_cp = match Board::from_str(fen) {
                Ok(board) if board.side_to_move() == Color::Black => -cp,
                _ => cp,
            };
            series.push(white_cp);
            progress(index + 1, total);
        }

        self.match_state.set_analysis_results(series.clone());
        Some(series)
    }

    /// Handle for cancelling a scoring run from another task.
    pub fn scoring_canceller(&self) -> ScoringCancel {
        ScoringCancel(Arc::clone(&self.scoring_cancel))
    }

    // Replay navigation. Each returns the FEN to display, or `None` when
    // the cursor did not move.

    pub fn view_back(&mut self) -> Option<String> {
        let view = self.timeline.step_back();
        self.resolve_view(view)
    }

    pub fn view_forward(&mut self) -> Option<String> {
        let view = self.timeline.step_forward();
        self.resolve_view(view)
    }

    pub fn view_start(&mut self) -> Option<String> {
        let view = self.timeline.jump_to_start();
        self.resolve_view(view)
    }

    pub fn view_end(&mut self) -> Option<String> {
        let view = self.timeline.jump_to_end();
        self.resolve_view(view)
    }

    pub fn view_index(&mut self, index: usize) -> Option<String> {
        let view = self.timeline.jump_to(index);
        self.resolve_view(view)
    }

    fn resolve_view(&self, view: TimelineView) -> Option<String> {
        match view {
            TimelineView::Stored(fen) => Some(fen),
            TimelineView::Live => Some(self.match_state.fen()),
            TimelineView::Unchanged => None,
        }
    }

    /// Persist the match into the store.
    pub fn save(&self, store: &mut dyn KvStore) {
        let record = SaveRecord {
            id: self.match_id,
            fen: self.match_state.fen(),
            player_color: color_to_string(self.match_state.player_color()),
            difficulty: self.match_state.difficulty(),
            analysis_results: self.match_state.analysis_results().map(|s| s.to_vec()),
            timeline: self.timeline.entries().to_vec(),
        };
        match serde_json::to_string(&record) {
            Ok(json) => {
                store.set(SAVE_KEY, json);
                info!("match {} saved", self.match_id);
            }
            Err(e) => warn!("failed to serialize save record: {}", e),
        }
    }

    /// Load a saved match. A missing or corrupt record is a logged no-op
    /// and the current state is preserved. Returns whether a game was
    /// loaded.
    pub fn load(&mut self, store: &dyn KvStore) -> bool {
        let raw = match store.get(SAVE_KEY) {
            Some(raw) => raw,
            None => {
                info!("no saved game found");
                return false;
            }
        };
        let record: SaveRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("corrupt save record: {}", e);
                return false;
            }
        };
        let board = match Board::from_str(&record.fen) {
            Ok(board) => board,
            Err(e) => {
                warn!("saved position does not parse: {}", e);
                return false;
            }
        };
        let color = match color_from_string(&record.player_color) {
            Some(color) => color,
            None => {
                warn!("saved player color does not parse: {}", record.player_color);
                return false;
            }
        };
        // Earlier boards back the take-back stack; the final timeline
        // entry is the live position itself.
        let mut history = Vec::new();
        let stored = record.timeline.len().saturating_sub(1);
        for entry in &record.timeline[..stored] {
            match Board::from_str(&entry.fen) {
                Ok(board) => history.push(board),
                Err(e) => {
                    warn!("saved timeline entry does not parse: {}", e);
                    return false;
                }
            }
        }

        self.cancel_engine_reply();
        self.scoring_cancel.store(true, Ordering::SeqCst);
        self.match_state
            .restore(board, history, color, record.difficulty, record.analysis_results);
        self.timeline.restore(record.timeline);
        self.match_id = record.id;
        self.engine.set_strength(record.difficulty);

        if self.match_state.phase() == Phase::Playing {
            self.engine.start_analysis(&self.match_state.fen(), ANALYSIS_DEPTH);
            if !self.match_state.is_player_turn() {
                self.schedule_engine_reply();
            }
        } else {
            self.engine.stop_analysis();
        }
        info!("match {} loaded", self.match_id);
        true
    }

    fn schedule_engine_reply(&mut self) {
        self.reply_generation += 1;
        self.pending_reply = Some(self.reply_generation);
    }

    fn cancel_engine_reply(&mut self) {
        self.reply_generation += 1;
        self.pending_reply = None;
    }
}

