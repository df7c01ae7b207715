//! Thin wrappers around the `chess` crate: move application with standard
//! notation, terminal-state detection and draw-by-material checks.
//!
//! Everything here is deterministic and side-effect free; game state lives
//! in [`MatchState`](crate::game::MatchState).

use chess::{Board, BoardStatus, ChessMove, Color, MoveGen, Piece, Square};
use std::str::FromStr;

/// A move request as it arrives from the user or the engine: coordinates
/// plus an optional promotion piece. Legality is decided here, not by the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveSpec {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Piece>,
}

impl MoveSpec {
    /// Parse a UCI coordinate move such as `e2e4` or `e7e8q`.
    pub fn from_uci(text: &str) -> Option<Self> {
        if text.len() < 4 {
            return None;
        }
        let from = Square::from_str(&text[0..2]).ok()?;
        let to = Square::from_str(&text[2..4]).ok()?;
        let promotion = match text.as_bytes().get(4) {
            None => None,
            Some(b'q') | Some(b'Q') => Some(Piece::Queen),
            Some(b'r') | Some(b'R') => Some(Piece::Rook),
            Some(b'b') | Some(b'B') => Some(Piece::Bishop),
            Some(b'n') | Some(b'N') => Some(Piece::Knight),
            Some(_) => return None,
        };
        Some(MoveSpec { from, to, promotion })
    }

    /// Render back to UCI coordinates.
    pub fn to_uci(self) -> String {
        let promo = match self.promotion {
            Some(Piece::Queen) => "q",
            Some(Piece::Rook) => "r",
            Some(Piece::Bishop) => "b",
            Some(Piece::Knight) => "n",
            _ => "",
        };
        format!("{}{}{}", self.from, self.to, promo)
    }
}

/// Outcome of a successfully applied move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResult {
    pub from: Square,
    pub to: Square,
    pub captured: Option<Piece>,
    pub san: String,
    pub is_check: bool,
    /// FEN of the position after the move.
    pub fen: String,
}

/// Apply `spec` to `board`. Returns the resulting board and a
/// [`MoveResult`], or `None` when the move is illegal.
pub fn apply_move(board: &Board, spec: MoveSpec) -> Option<(Board, MoveResult)> {
    let mv = ChessMove::new(spec.from, spec.to, spec.promotion);
    if !board.legal(mv) {
        return None;
    }

    let moved = board.piece_on(spec.from)?;
    let captured = match board.piece_on(spec.to) {
        Some(piece) => Some(piece),
        // A pawn landing on an empty square of a different file is an
        // en passant capture.
        None if moved == Piece::Pawn && spec.from.get_file() != spec.to.get_file() => {
            Some(Piece::Pawn)
        }
        None => None,
    };

    let san = san_for_move(board, mv);
    let next = board.make_move_new(mv);
    let result = MoveResult {
        from: spec.from,
        to: spec.to,
        captured,
        san,
        is_check: is_check(&next),
        fen: next.to_string(),
    };
    Some((next, result))
}

/// All legal moves in `board`, optionally restricted to one source square.
pub fn legal_moves(board: &Board, from: Option<Square>) -> Vec<ChessMove> {
    MoveGen::new_legal(board)
        .filter(|mv| from.map_or(true, |sq| mv.get_source() == sq))
        .collect()
}

pub fn is_check(board: &Board) -> bool {
    board.checkers().0 > 0
}

pub fn is_checkmate(board: &Board) -> bool {
    board.status() == BoardStatus::Checkmate
}

/// Terminal test: checkmate, stalemate or a dead position.
pub fn is_game_over(board: &Board) -> bool {
    board.status() != BoardStatus::Ongoing || has_insufficient_material(board)
}

/// Standard algebraic notation for a legal move in `board`.
pub fn san_for_move(board: &Board, mv: ChessMove) -> String {
    let src = mv.get_source();
    let dest = mv.get_dest();
    let piece = match board.piece_on(src) {
        Some(piece) => piece,
        None => return mv.to_string(),
    };

    let next = board.make_move_new(mv);
    let suffix = if next.status() == BoardStatus::Checkmate {
        "#"
    } else if is_check(&next) {
        "+"
    } else {
        ""
    };

    // Castling reads from the king's travel distance.
    if piece == Piece::King {
        let from_file = src.get_file().to_index() as i8;
        let to_file = dest.get_file().to_index() as i8;
        if to_file - from_file == 2 {
            return format!("O-O{}", suffix);
        }
        if from_file - to_file == 2 {
            return format!("O-O-O{}", suffix);
        }
    }

    let is_capture = board.piece_on(dest).is_some()
        || (piece == Piece::Pawn && src.get_file() != dest.get_file());

    let promo = match mv.get_promotion() {
        Some(Piece::Queen) => "=Q",
        Some(Piece::Rook) => "=R",
        Some(Piece::Bishop) => "=B",
        Some(Piece::Knight) => "=N",
        _ => "",
    };

    if piece == Piece::Pawn {
        return if is_capture {
            format!("{}x{}{}{}", file_letter(src), dest, promo, suffix)
        } else {
            format!("{}{}{}", dest, promo, suffix)
        };
    }

    format!(
        "{}{}{}{}{}",
        piece_letter(piece),
        disambiguation(board, piece, src, dest),
        if is_capture { "x" } else { "" },
        dest,
        suffix
    )
}

fn piece_letter(piece: Piece) -> &'static str {
    match piece {
        Piece::Knight => "N",
        Piece::Bishop => "B",
        Piece::Rook => "R",
        Piece::Queen => "Q",
        Piece::King => "K",
        Piece::Pawn => "",
    }
}

fn file_letter(square: Square) -> char {
    (b'a' + square.get_file().to_index() as u8) as char
}

fn rank_digit(square: Square) -> char {
    (b'1' + square.get_rank().to_index() as u8) as char
}

/// SAN disambiguation when another piece of the same kind can reach the
/// same destination.
fn disambiguation(board: &Board, piece: Piece, src: Square, dest: Square) -> String {
    let rivals: Vec<Square> = MoveGen::new_legal(board)
        .filter(|mv| {
            mv.get_dest() == dest
                && mv.get_source() != src
                && board.piece_on(mv.get_source()) == Some(piece)
        })
        .map(|mv| mv.get_source())
        .collect();

    if rivals.is_empty() {
        return String::new();
    }
    if rivals.iter().all(|sq| sq.get_file() != src.get_file()) {
        return file_letter(src).to_string();
    }
    if rivals.iter().all(|sq| sq.get_rank() != src.get_rank()) {
        return rank_digit(src).to_string();
    }
    format!("{}{}", file_letter(src), rank_digit(src))
}

/// Check if the board has insufficient material for checkmate: bare kings,
/// a lone minor piece, or same-colored single bishops.
pub fn has_insufficient_material(board: &Board) -> bool {
    let mut minors = 0;
    let mut bishop_square_colors = [false, false];

    for square in chess::ALL_SQUARES {
        let piece = match board.piece_on(square) {
            Some(piece) => piece,
            None => continue,
        };
        match piece {
            Piece::King => {}
            Piece::Knight => minors += 1,
            Piece::Bishop => {
                minors += 1;
                let shade = (square.get_rank().to_index() + square.get_file().to_index()) % 2;
                bishop_square_colors[shade] = true;
            }
            // Any pawn, rook or queen is mating material.
            _ => return false,
        }
    }

    match minors {
        0 | 1 => true,
        2 => {
            // One bishop per side, both confined to squares of one shade.
            let white_bishops = count_bishops(board, Color::White);
            let black_bishops = count_bishops(board, Color::Black);
            white_bishops == 1
                && black_bishops == 1
                && bishop_square_colors.iter().filter(|set| **set).count() == 1
        }
        _ => false,
    }
}

fn count_bishops(board: &Board, color: Color) -> u32 {
    (board.pieces(Piece::Bishop) & board.color_combined(color)).popcnt()
}
