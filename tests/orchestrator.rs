//! End-to-end orchestration flows driven against a scripted engine.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chess::Color;

use chess_coach::config::ANALYSIS_DEPTH;
use chess_coach::engine::protocol::{AnalysisInfo, Score};
use chess_coach::engine::{AnalysisUpdate, EngineBackend, EvalResult};
use chess_coach::game::rules::MoveSpec;
use chess_coach::game::{Phase, Winner};
use chess_coach::models::records::SAVE_KEY;
use chess_coach::models::store::{KvStore, MemoryStore};
use chess_coach::orchestrator::{EngineReply, Orchestrator, PlayOutcome, ScoringCancel};

/// Scripted engine double. Best-move answers are consumed from a queue;
/// every call is journaled for assertions.
#[derive(Default)]
struct FakeEngine {
    best_moves: Mutex<VecDeque<Option<String>>>,
    score: Mutex<Option<Score>>,
    score_calls: Mutex<usize>,
    cancel_after_scores: Mutex<Option<(usize, ScoringCancel)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    fn script_moves(&self, moves: &[&str]) {
        let mut q = self.best_moves.lock().unwrap();
        for m in moves {
            q.push_back(Some(m.to_string()));
        }
    }

    fn script_no_move(&self) {
        self.best_moves.lock().unwrap().push_back(None);
    }

    fn set_score(&self, score: Score) {
        *self.score.lock().unwrap() = Some(score);
    }

    fn score_calls(&self) -> usize {
        *self.score_calls.lock().unwrap()
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn unconsumed_moves(&self) -> usize {
        self.best_moves.lock().unwrap().len()
    }

    fn cancel_after(&self, count: usize, cancel: Option<ScoringCancel>) {
        *self.cancel_after_scores.lock().unwrap() = cancel.map(|c| (count, c));
    }
}

#[async_trait]
impl EngineBackend for FakeEngine {
    async fn best_move(&self, _fen: &str, level: u8) -> Option<String> {
        self.calls.lock().unwrap().push(format!("best_move level={}", level));
        self.best_moves.lock().unwrap().pop_front().flatten()
    }

    async fn score_position(&self, _fen: &str, _movetime_ms: u64) -> Option<EvalResult> {
        let count = {
            let mut n = self.score_calls.lock().unwrap();
            *n += 1;
            *n
        };
        if let Some((after, cancel)) = &*self.cancel_after_scores.lock().unwrap() {
            if count == *after {
                cancel.cancel();
            }
        }
        self.score
            .lock()
            .unwrap()
            .map(|score| EvalResult { score, depth: 12 })
    }

    fn set_strength(&self, level: u8) {
        self.calls.lock().unwrap().push(format!("set_strength {}", level));
    }

    fn start_analysis(&self, _fen: &str, max_depth: u32) {
        self.calls.lock().unwrap().push(format!("start_analysis depth={}", max_depth));
    }

    fn stop_analysis(&self) {
        self.calls.lock().unwrap().push("stop_analysis".to_string());
    }
}

fn spec(uci: &str) -> MoveSpec {
    MoveSpec::from_uci(uci).unwrap()
}

fn started(color: Color, difficulty: u8) -> Orchestrator<FakeEngine> {
    let mut orch = Orchestrator::new(FakeEngine::default());
    orch.start_game(color, difficulty);
    orch
}

/// 1.e4 e5 2.Bc4 Nc6 3.Qh5 Nf6 4.Qxf7#, engine replies scripted.
async fn play_scholars_mate(orch: &mut Orchestrator<FakeEngine>) -> PlayOutcome {
    orch.engine().script_moves(&["e7e5", "b8c6", "g8f6"]);
    for mv in ["e2e4", "f1c4", "d1h5"] {
        assert!(matches!(orch.play_move(spec(mv)), PlayOutcome::Played(_)));
        assert!(matches!(orch.engine_reply().await, EngineReply::Played(_)));
    }
    orch.play_move(spec("h5f7"))
}

#[test]
fn start_game_configures_engine_and_seeds_timeline() {
    let orch = started(Color::White, 7);
    assert_eq!(orch.match_state().phase(), Phase::Playing);
    assert_eq!(orch.timeline().entries().len(), 1);
    let calls = orch.engine().calls();
    assert!(calls.contains(&"set_strength 7".to_string()));
    assert!(calls.contains(&format!("start_analysis depth={}", ANALYSIS_DEPTH)));
    assert!(!orch.has_scheduled_engine_reply());
}

#[test]
fn playing_black_schedules_the_opening_reply() {
    let orch = started(Color::Black, 5);
    assert!(orch.has_scheduled_engine_reply());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn player_move_then_engine_reply() {
    let mut orch = started(Color::White, 5);
    orch.engine().script_moves(&["e7e5"]);

    let outcome = orch.play_move(spec("e2e4"));
    match outcome {
        PlayOutcome::Played(result) => assert_eq!(result.san, "e4"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(orch.has_scheduled_engine_reply());

    match orch.engine_reply().await {
        EngineReply::Played(result) => assert_eq!(result.san, "e5"),
        other => panic!("unexpected reply: {:?}", other),
    }
    assert_eq!(orch.timeline().ply_count(), 2);
    assert!(orch.match_state().is_player_turn());
    // Analysis restarted on the new position.
    let calls = orch.engine().calls();
    assert!(calls.last().unwrap().starts_with("start_analysis"));
}

#[test]
fn rejects_moves_out_of_turn_or_phase() {
    let mut orch = Orchestrator::new(FakeEngine::default());
    assert_eq!(orch.play_move(spec("e2e4")), PlayOutcome::NotPlaying);

    orch.start_game(Color::Black, 5);
    assert_eq!(orch.play_move(spec("e2e4")), PlayOutcome::NotYourTurn);
}

#[test]
fn rejects_moves_while_replaying() {
    let mut orch = started(Color::White, 5);
    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    assert!(orch.view_back().is_some());
    assert_eq!(orch.play_move(spec("d2d4")), PlayOutcome::Replaying);
    assert!(orch.view_end().is_some());
    assert!(matches!(
        orch.play_move(spec("d2d4")),
        PlayOutcome::Illegal | PlayOutcome::NotYourTurn
    ));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn checkmate_by_the_player_ends_the_game() {
    let mut orch = started(Color::White, 5);
    match play_scholars_mate(&mut orch).await {
        PlayOutcome::GameOver(result, winner) => {
            assert_eq!(result.san, "Qxf7#");
            assert_eq!(winner, Winner::White);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(orch.match_state().phase(), Phase::Over);
    assert!(!orch.has_scheduled_engine_reply());

    // A late analysis callback must not resurface on the result screen,
    // even one computed for the final position.
    let update = AnalysisUpdate {
        fen: orch.match_state().fen(),
        info: AnalysisInfo {
            depth: 10,
            score: Score::Cp(120),
            pv: vec!["a2a3".to_string()],
        },
    };
    orch.apply_analysis(&update);
    assert!(orch.match_state().evaluation().is_none());
    assert!(orch.match_state().best_hint().is_none());
}

#[test]
fn analysis_for_a_superseded_position_is_discarded() {
    let mut orch = started(Color::White, 5);
    let initial = orch.match_state().fen();
    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));

    // An update that was computed before the move landed is ignored.
    let stale = AnalysisUpdate {
        fen: initial,
        info: AnalysisInfo {
            depth: 12,
            score: Score::Cp(30),
            pv: vec!["e2e4".to_string()],
        },
    };
    orch.apply_analysis(&stale);
    assert!(orch.match_state().evaluation().is_none());
    assert!(orch.match_state().best_hint().is_none());

    // One computed for the current position is applied.
    let fresh = AnalysisUpdate {
        fen: orch.match_state().fen(),
        info: AnalysisInfo {
            depth: 12,
            score: Score::Cp(-15),
            pv: vec!["e7e5".to_string()],
        },
    };
    orch.apply_analysis(&fresh);
    assert!(orch.match_state().evaluation().is_some());
    assert_eq!(orch.match_state().best_hint(), Some("e7e5"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn engine_decline_leaves_turn_with_engine_until_retried() {
    let mut orch = started(Color::White, 5);
    orch.engine().script_no_move();

    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    assert_eq!(orch.engine_reply().await, EngineReply::NoMove);
    assert_eq!(orch.match_state().phase(), Phase::Playing);
    assert!(!orch.match_state().is_player_turn());
    assert!(!orch.has_scheduled_engine_reply());

    orch.engine().script_moves(&["e7e5"]);
    orch.retry_engine_move();
    assert!(orch.has_scheduled_engine_reply());
    assert!(matches!(orch.engine_reply().await, EngineReply::Played(_)));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn resign_cancels_the_scheduled_reply() {
    let mut orch = started(Color::White, 5);
    orch.engine().script_moves(&["e7e5"]);

    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    orch.resign();

    assert_eq!(orch.match_state().phase(), Phase::Over);
    assert_eq!(orch.match_state().winner(), Some(Winner::Black));
    assert_eq!(orch.engine_reply().await, EngineReply::NotScheduled);
    // The scripted reply was never consumed.
    assert_eq!(orch.engine().unconsumed_moves(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn take_back_removes_two_plies_after_an_engine_reply() {
    let mut orch = started(Color::White, 5);
    orch.engine().script_moves(&["e7e5"]);
    let initial = orch.match_state().fen();

    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    assert!(matches!(orch.engine_reply().await, EngineReply::Played(_)));

    assert!(orch.take_back());
    assert_eq!(orch.match_state().fen(), initial);
    assert_eq!(orch.timeline().ply_count(), 0);
    assert!(orch.match_state().is_player_turn());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn take_back_removes_one_ply_while_the_engine_is_thinking() {
    let mut orch = started(Color::White, 5);
    let initial = orch.match_state().fen();

    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    assert!(orch.has_scheduled_engine_reply());

    assert!(orch.take_back());
    assert_eq!(orch.match_state().fen(), initial);
    assert!(orch.match_state().is_player_turn());
    assert_eq!(orch.engine_reply().await, EngineReply::NotScheduled);
}

#[test]
fn take_back_refused_at_the_starting_position() {
    let mut orch = started(Color::White, 5);
    assert!(!orch.take_back());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn take_back_refused_before_a_black_player_has_moved() {
    let mut orch = started(Color::Black, 5);
    orch.engine().script_moves(&["e2e4"]);
    assert!(matches!(orch.engine_reply().await, EngineReply::Played(_)));
    let fen = orch.match_state().fen();

    // Only the engine's opening ply exists; there is nothing of the
    // player's to take back, and accepting would strand the engine's turn.
    assert!(!orch.take_back());
    assert_eq!(orch.match_state().fen(), fen);
    assert_eq!(orch.timeline().ply_count(), 1);
    assert!(orch.match_state().is_player_turn());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn scoring_normalizes_to_whites_perspective() {
    let mut orch = started(Color::White, 5);
    orch.engine().set_score(Score::Cp(50));
    orch.engine().script_moves(&["e7e5"]);

    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    assert!(matches!(orch.engine_reply().await, EngineReply::Played(_)));
    orch.resign();

    let mut seen = Vec::new();
    let series = orch
        .score_game(|done, total| seen.push((done, total)))
        .await
        .unwrap();
    // Positions alternate side to move: white, black, white.
    assert_eq!(series, vec![50, -50, 50]);
    assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn scoring_is_memoized() {
    let mut orch = started(Color::White, 5);
    orch.engine().set_score(Score::Cp(10));
    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    orch.resign();

    let first = orch.score_game(|_, _| {}).await.unwrap();
    let calls_after_first = orch.engine().score_calls();
    let second = orch.score_game(|_, _| {}).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(orch.engine().score_calls(), calls_after_first);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn scoring_refused_while_playing() {
    let mut orch = started(Color::White, 5);
    assert!(orch.score_game(|_, _| {}).await.is_none());
    assert_eq!(orch.engine().score_calls(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn scoring_stops_when_cancelled_and_is_not_memoized() {
    let mut orch = started(Color::White, 5);
    orch.engine().set_score(Score::Cp(10));
    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    orch.resign();

    let cancel = orch.scoring_canceller();
    orch.engine().cancel_after(1, Some(cancel));

    assert!(orch.score_game(|_, _| {}).await.is_none());
    assert_eq!(orch.engine().score_calls(), 1);
    assert!(orch.match_state().analysis_results().is_none());

    // A fresh run starts over.
    orch.engine().cancel_after(0, None);
    assert!(orch.score_game(|_, _| {}).await.is_some());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn scoring_records_zero_when_the_engine_has_no_answer() {
    let mut orch = started(Color::White, 5);
    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    orch.resign();

    let series = orch.score_game(|_, _| {}).await.unwrap();
    assert_eq!(series, vec![0, 0]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn save_and_load_restore_the_match() {
    let mut store = MemoryStore::new();
    let saved_fen;
    let saved_id;
    {
        let mut orch = started(Color::White, 8);
        orch.engine().script_moves(&["e7e5"]);
        assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
        assert!(matches!(orch.engine_reply().await, EngineReply::Played(_)));
        saved_fen = orch.match_state().fen();
        saved_id = orch.match_id();
        orch.save(&mut store);
    }

    let mut orch = Orchestrator::new(FakeEngine::default());
    assert!(orch.load(&store));
    assert_eq!(orch.match_state().fen(), saved_fen);
    assert_eq!(orch.match_id(), saved_id);
    assert_eq!(orch.match_state().phase(), Phase::Playing);
    assert_eq!(orch.match_state().difficulty(), 8);
    assert_eq!(orch.match_state().player_color(), Color::White);
    assert_eq!(orch.timeline().ply_count(), 2);
    assert!(orch.match_state().is_player_turn());
    assert!(!orch.has_scheduled_engine_reply());
    // Take-back still works across the reload.
    assert!(orch.take_back());
    assert_eq!(orch.timeline().ply_count(), 0);

    let calls = orch.engine().calls();
    assert!(calls.contains(&"set_strength 8".to_string()));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn load_schedules_a_reply_when_it_is_the_engines_turn() {
    let mut store = MemoryStore::new();
    {
        let mut orch = started(Color::White, 5);
        assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
        orch.save(&mut store);
    }
    let mut orch = Orchestrator::new(FakeEngine::default());
    assert!(orch.load(&store));
    assert!(orch.has_scheduled_engine_reply());
}

#[test]
fn load_rejects_a_corrupt_record_and_keeps_state() {
    let mut store = MemoryStore::new();
    store.set(SAVE_KEY, "not json".to_string());

    let mut orch = started(Color::White, 5);
    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    let fen = orch.match_state().fen();

    assert!(!orch.load(&store));
    assert_eq!(orch.match_state().fen(), fen);
    assert_eq!(orch.timeline().ply_count(), 1);
}

#[test]
fn load_of_an_empty_store_is_a_no_op() {
    let store = MemoryStore::new();
    let mut orch = started(Color::White, 5);
    assert!(!orch.load(&store));
    assert_eq!(orch.match_state().phase(), Phase::Playing);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn loading_a_finished_game_comes_back_as_over() {
    let mut store = MemoryStore::new();
    {
        let mut orch = started(Color::White, 5);
        assert!(matches!(
            play_scholars_mate(&mut orch).await,
            PlayOutcome::GameOver(_, Winner::White)
        ));
        orch.save(&mut store);
    }
    let mut orch = Orchestrator::new(FakeEngine::default());
    assert!(orch.load(&store));
    assert_eq!(orch.match_state().phase(), Phase::Over);
    assert_eq!(orch.match_state().winner(), Some(Winner::White));
    assert!(!orch.has_scheduled_engine_reply());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn rematch_reuses_the_previous_configuration() {
    let mut orch = started(Color::Black, 9);
    orch.engine().script_moves(&["e2e4"]);
    assert!(matches!(orch.engine_reply().await, EngineReply::Played(_)));

    orch.rematch();
    assert_eq!(orch.match_state().phase(), Phase::Playing);
    assert_eq!(orch.match_state().player_color(), Color::Black);
    assert_eq!(orch.match_state().difficulty(), 9);
    assert_eq!(orch.timeline().ply_count(), 0);
    assert!(orch.has_scheduled_engine_reply());
}

#[test]
fn navigation_resolves_live_and_stored_views() {
    let mut orch = started(Color::White, 5);
    let initial = orch.match_state().fen();
    assert!(matches!(orch.play_move(spec("e2e4")), PlayOutcome::Played(_)));
    let live = orch.match_state().fen();

    assert_eq!(orch.view_back(), Some(initial.clone()));
    assert_eq!(orch.view_back(), None);
    assert_eq!(orch.view_forward(), Some(live.clone()));
    assert_eq!(orch.view_forward(), None);
    assert_eq!(orch.view_start(), Some(initial));
    assert_eq!(orch.view_end(), Some(live));
}
