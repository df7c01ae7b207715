//! Authoritative record of one match: phase lifecycle, current position,
//! evaluation snapshot and the memoized post-game score series.

use chess::{Board, BoardStatus, Color, Piece};
use log::info;

use crate::engine::protocol::{AnalysisInfo, Score};
use crate::game::rules::{self, MoveResult, MoveSpec};

pub const DEFAULT_DIFFICULTY: u8 = 5;

/// Match lifecycle. Setup → Playing on game start, Playing → Over on a
/// terminal position or resignation, Over → Setup on "new game".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Playing,
    Over,
}

/// Result of a finished game. Present exactly while the phase is Over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    White,
    Black,
    Draw,
}

impl Winner {
    pub fn from_color(color: Color) -> Self {
        match color {
            Color::White => Winner::White,
            Color::Black => Winner::Black,
        }
    }
}

/// Evaluation snapshot from the most recent analysis of the current
/// position. Invalid the moment the position advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub score: Score,
    pub depth: u32,
}

#[derive(Debug, Clone)]
pub struct MatchState {
    phase: Phase,
    board: Board,
    /// Board and halfmove clock before each applied ply, for take-back
    /// and repetition counting.
    undo_stack: Vec<(Board, u32)>,
    /// Plies since the last pawn move or capture (`chess::Board` does not
    /// carry this).
    halfmove_clock: u32,
    player_color: Color,
    difficulty: u8,
    last_color: Color,
    last_difficulty: u8,
    evaluation: Option<Evaluation>,
    best_hint: Option<String>,
    winner: Option<Winner>,
    analysis_results: Option<Vec<i32>>,
}

impl Default for MatchState {
    fn default() -> Self {
        MatchState {
            phase: Phase::Setup,
            board: Board::default(),
            undo_stack: Vec::new(),
            halfmove_clock: 0,
            player_color: Color::White,
            difficulty: DEFAULT_DIFFICULTY,
            last_color: Color::White,
            last_difficulty: DEFAULT_DIFFICULTY,
            evaluation: None,
            best_hint: None,
            winner: None,
            analysis_results: None,
        }
    }
}

impl MatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn fen(&self) -> String {
        self.board.to_string()
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    pub fn player_color(&self) -> Color {
        self.player_color
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn last_color(&self) -> Color {
        self.last_color
    }

    pub fn last_difficulty(&self) -> u8 {
        self.last_difficulty
    }

    pub fn is_player_turn(&self) -> bool {
        self.board.side_to_move() == self.player_color
    }

    pub fn winner(&self) -> Option<Winner> {
        self.winner
    }

    pub fn evaluation(&self) -> Option<Evaluation> {
        self.evaluation
    }

    pub fn best_hint(&self) -> Option<&str> {
        self.best_hint.as_deref()
    }

    pub fn analysis_results(&self) -> Option<&[i32]> {
        self.analysis_results.as_deref()
    }

    pub fn ply_count(&self) -> usize {
        self.undo_stack.len()
    }

    /// Begin a match from the standard starting position. The chosen
    /// configuration is remembered for a quick rematch.
    pub fn start_game(&mut self, color: Color, difficulty: u8) {
        *self = MatchState {
            phase: Phase::Playing,
            player_color: color,
            difficulty,
            last_color: color,
            last_difficulty: difficulty,
            ..MatchState::default()
        };
    }

    /// Back to the setup screen; everything match-specific is dropped.
    pub fn new_game(&mut self) {
        let last_color = self.last_color;
        let last_difficulty = self.last_difficulty;
        *self = MatchState { last_color, last_difficulty, ..MatchState::default() };
    }

    /// Apply a move for whichever side is to move. Returns `None` for
    /// illegal input with no state change. On success the hint and
    /// evaluation snapshots are invalidated and terminal conditions are
    /// checked.
    pub fn apply_move(&mut self, spec: MoveSpec) -> Option<MoveResult> {
        if self.phase != Phase::Playing {
            return None;
        }
        let pawn_move = self.board.piece_on(spec.from) == Some(Piece::Pawn);
        let (next, result) = rules::apply_move(&self.board, spec)?;
        self.undo_stack.push((self.board, self.halfmove_clock));
        self.board = next;
        self.halfmove_clock = if pawn_move || result.captured.is_some() {
            0
        } else {
            self.halfmove_clock + 1
        };
        self.evaluation = None;
        self.best_hint = None;
        self.detect_game_end();
        Some(result)
    }

    /// Check the current position for a game end. On checkmate the side
    /// that just moved wins; stalemate, dead positions, threefold
    /// repetition and the fifty-move rule are draws.
    pub fn detect_game_end(&mut self) -> bool {
        if self.phase != Phase::Playing {
            return self.phase == Phase::Over;
        }
        if self.board.status() == BoardStatus::Checkmate {
            self.phase = Phase::Over;
            self.winner = Some(Winner::from_color(!self.board.side_to_move()));
            info!("checkmate: {:?} wins", self.winner);
            return true;
        }
        if self.board.status() == BoardStatus::Stalemate
            || rules::has_insufficient_material(&self.board)
            || self.halfmove_clock >= 100
            || self.repetition_count() >= 3
        {
            self.phase = Phase::Over;
            self.winner = Some(Winner::Draw);
            info!("game drawn");
            return true;
        }
        false
    }

    /// Occurrences of the current position over the whole game, including
    /// itself. The board hash covers side to move, castling rights and en
    /// passant, as repetition requires.
    fn repetition_count(&self) -> u32 {
        let hash = self.board.get_hash();
        1 + self
            .undo_stack
            .iter()
            .filter(|(board, _)| board.get_hash() == hash)
            .count() as u32
    }

    /// Reverse one applied ply. Only meaningful while Playing; the
    /// orchestrator additionally requires the timeline to be live.
    pub fn undo_last_ply(&mut self) -> bool {
        if self.phase != Phase::Playing {
            return false;
        }
        match self.undo_stack.pop() {
            Some((board, clock)) => {
                self.board = board;
                self.halfmove_clock = clock;
                self.evaluation = None;
                self.best_hint = None;
                true
            }
            None => false,
        }
    }

    /// Forced Playing → Over transition; the opposite side wins
    /// regardless of the position on the board.
    pub fn resign(&mut self, side: Color) {
        if self.phase != Phase::Playing {
            return;
        }
        self.phase = Phase::Over;
        self.winner = Some(Winner::from_color(!side));
        info!("{:?} resigned", side);
    }

    /// Record the latest streamed analysis for the current position.
    /// Callers must have already discarded stale updates.
    pub fn set_analysis_snapshot(&mut self, info: &AnalysisInfo) {
        self.evaluation = Some(Evaluation { score: info.score, depth: info.depth });
        if let Some(mv) = info.best_move() {
            self.best_hint = Some(mv.to_string());
        }
    }

    pub fn set_analysis_results(&mut self, series: Vec<i32>) {
        self.analysis_results = Some(series);
    }

    pub fn clear_analysis_results(&mut self) {
        self.analysis_results = None;
    }

    /// Rebuild from persisted data. The phase is forced to Playing and
    /// terminal detection re-run so an already-finished game comes back
    /// as Over.
    pub fn restore(
        &mut self,
        board: Board,
        history: Vec<Board>,
        player_color: Color,
        difficulty: u8,
        analysis_results: Option<Vec<i32>>,
    ) {
        // Persisted FENs do not carry the halfmove clock; the fifty-move
        // count restarts from the loaded position.
        *self = MatchState {
            phase: Phase::Playing,
            board,
            undo_stack: history.into_iter().map(|board| (board, 0)).collect(),
            halfmove_clock: 0,
            player_color,
            difficulty,
            last_color: player_color,
            last_difficulty: difficulty,
            evaluation: None,
            best_hint: None,
            winner: None,
            analysis_results,
        };
        self.detect_game_end();
    }
}
