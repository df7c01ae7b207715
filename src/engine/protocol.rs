//! Line grammar of the external search engine.
//!
//! The engine speaks a UCI-style line protocol: we consume `uciok`,
//! `readyok`, `info … score … pv …` and `bestmove …`, and ignore anything
//! we do not recognize. Command formatting lives here as well so the
//! session code never does string assembly inline.

use crate::config::MATE_CP_CEILING;

/// Evaluation score, preserving the cp/mate distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    /// Centipawns from the side to move's perspective.
    Cp(i32),
    /// Mate in N moves; negative means the side to move is being mated.
    Mate(i32),
}

impl Score {
    /// Fold onto a single centipawn axis, mate scores saturating toward
    /// the ceiling so that faster mates score higher.
    pub fn as_centipawns(self) -> i32 {
        match self {
            Score::Cp(cp) => cp,
            Score::Mate(n) if n > 0 => MATE_CP_CEILING - n.abs() * 100,
            Score::Mate(n) => -MATE_CP_CEILING + n.abs() * 100,
        }
    }
}

/// One parsed `info` line from a running search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisInfo {
    pub depth: u32,
    pub score: Score,
    /// Principal variation in UCI coordinates.
    pub pv: Vec<String>,
}

impl AnalysisInfo {
    /// First move of the principal variation, if any.
    pub fn best_move(&self) -> Option<&str> {
        self.pv.first().map(String::as_str)
    }
}

/// Final evaluation reported by a one-shot scoring search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalResult {
    pub score: Score,
    pub depth: u32,
}

/// A recognized inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// `uciok`: capability handshake acknowledged.
    CapabilityAck,
    /// `readyok`: readiness probe acknowledged.
    ReadyAck,
    /// A search progress line.
    Info(AnalysisInfo),
    /// `bestmove <move>`; `None` when the engine declines (`(none)`).
    BestMove(Option<String>),
}

/// Parse one inbound line. Unrecognized or malformed lines yield `None`
/// and are ignored by the caller.
pub fn parse_line(line: &str) -> Option<EngineEvent> {
    let line = line.trim();
    if line == "uciok" {
        return Some(EngineEvent::CapabilityAck);
    }
    if line == "readyok" {
        return Some(EngineEvent::ReadyAck);
    }
    if let Some(rest) = line.strip_prefix("bestmove") {
        let mv = rest.split_whitespace().next()?;
        let mv = if mv == "(none)" { None } else { Some(mv.to_string()) };
        return Some(EngineEvent::BestMove(mv));
    }
    if line.starts_with("info") && line.contains("score") {
        return parse_info(line).map(EngineEvent::Info);
    }
    None
}

fn parse_info(line: &str) -> Option<AnalysisInfo> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut depth = None;
    let mut score = None;
    let mut pv = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                depth = tokens.get(i + 1).and_then(|t| t.parse::<u32>().ok());
                i += 2;
            }
            "score" => {
                let kind = tokens.get(i + 1)?;
                let value = tokens.get(i + 2).and_then(|t| t.parse::<i32>().ok())?;
                score = match *kind {
                    "cp" => Some(Score::Cp(value)),
                    "mate" => Some(Score::Mate(value)),
                    _ => None,
                };
                i += 3;
            }
            "pv" => {
                // Everything after `pv` is the variation.
                pv = tokens[i + 1..].iter().map(|t| t.to_string()).collect();
                break;
            }
            _ => i += 1,
        }
    }

    Some(AnalysisInfo { depth: depth?, score: score?, pv })
}

// Outbound command lines.

pub fn cmd_handshake() -> String {
    "uci".to_string()
}

pub fn cmd_ready_probe() -> String {
    "isready".to_string()
}

pub fn cmd_skill_level(skill: u8) -> String {
    format!("setoption name Skill Level value {}", skill)
}

pub fn cmd_position(fen: &str) -> String {
    format!("position fen {}", fen)
}

pub fn cmd_go_depth(depth: u32) -> String {
    format!("go depth {}", depth)
}

pub fn cmd_go_movetime(millis: u64) -> String {
    format!("go movetime {}", millis)
}

pub fn cmd_stop() -> String {
    "stop".to_string()
}

pub fn cmd_quit() -> String {
    "quit".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_handshake_lines() {
        assert_eq!(parse_line("uciok"), Some(EngineEvent::CapabilityAck));
        assert_eq!(parse_line("readyok"), Some(EngineEvent::ReadyAck));
        assert_eq!(parse_line("  readyok  "), Some(EngineEvent::ReadyAck));
    }

    #[test]
    fn parses_bestmove() {
        assert_eq!(
            parse_line("bestmove e2e4 ponder e7e5"),
            Some(EngineEvent::BestMove(Some("e2e4".to_string())))
        );
        assert_eq!(parse_line("bestmove (none)"), Some(EngineEvent::BestMove(None)));
    }

    #[test]
    fn parses_info_with_cp_score() {
        let event = parse_line(
            "info depth 12 seldepth 16 score cp 35 nodes 12345 nps 100000 pv e2e4 e7e5 g1f3",
        );
        match event {
            Some(EngineEvent::Info(info)) => {
                assert_eq!(info.depth, 12);
                assert_eq!(info.score, Score::Cp(35));
                assert_eq!(info.pv, vec!["e2e4", "e7e5", "g1f3"]);
                assert_eq!(info.best_move(), Some("e2e4"));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn parses_info_with_mate_score() {
        let event = parse_line("info depth 8 score mate -3 pv h7h8");
        match event {
            Some(EngineEvent::Info(info)) => {
                assert_eq!(info.score, Score::Mate(-3));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn malformed_lines_are_ignored() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("info string NNUE evaluation enabled"), None);
        assert_eq!(parse_line("info depth x score cp y"), None);
        assert_eq!(parse_line("id name SomeEngine"), None);
        assert_eq!(parse_line("bestmove"), None);
    }

    #[test]
    fn mate_scores_fold_onto_cp_axis() {
        assert_eq!(Score::Cp(42).as_centipawns(), 42);
        assert_eq!(Score::Mate(2).as_centipawns(), 9800);
        assert_eq!(Score::Mate(-2).as_centipawns(), -9800);
        assert!(Score::Mate(1).as_centipawns() > Score::Mate(5).as_centipawns());
    }
}
