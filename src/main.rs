use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chess::Color;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use chess_coach::config::{DIFFICULTY_MAX, DIFFICULTY_MIN, SCORING_MOVETIME_MS};
use chess_coach::engine::AnalysisUpdate;
use chess_coach::engine::{EngineBackend, EngineSession, EvalResult, Score};
use chess_coach::game::rules::MoveSpec;
use chess_coach::game::{Phase, Winner};
use chess_coach::models::records::{color_from_string, SettingsRecord, SAVE_KEY, SETTINGS_KEY};
use chess_coach::models::store::{FileStore, KvStore, MemoryStore};
use chess_coach::orchestrator::{EngineReply, Orchestrator, PlayOutcome};

const SAVE_FILE: &str = "chess_coach.json";

/// Engine handle for the CLI. When no engine process is available every
/// query degrades to `None` and the match continues without assistance.
struct CoachEngine {
    session: Option<Arc<EngineSession>>,
}

#[async_trait]
impl EngineBackend for CoachEngine {
    async fn best_move(&self, fen: &str, level: u8) -> Option<String> {
        match &self.session {
            Some(session) => session.request_best_move(fen, level).await,
            None => None,
        }
    }

    async fn score_position(&self, fen: &str, movetime_ms: u64) -> Option<EvalResult> {
        match &self.session {
            Some(session) => session.analyze_position(fen, movetime_ms).await,
            None => None,
        }
    }

    fn set_strength(&self, level: u8) {
        if let Some(session) = &self.session {
            session.set_strength(level);
        }
    }

    fn start_analysis(&self, fen: &str, max_depth: u32) {
        if let Some(session) = &self.session {
            session.start_analysis(fen, max_depth);
        }
    }

    fn stop_analysis(&self) {
        if let Some(session) = &self.session {
            session.stop_analysis();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let engine_path = env::args()
        .nth(1)
        .or_else(|| env::var("ENGINE_PATH").ok())
        .map(PathBuf::from);

    let (session, mut analysis_rx, _analysis_keepalive) = start_engine(engine_path).await;
    let engine = CoachEngine { session };

    let mut store: Box<dyn KvStore> = match FileStore::open(PathBuf::from(SAVE_FILE)) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!("cannot open {}: {}; progress will not persist", SAVE_FILE, e);
            Box::new(MemoryStore::new())
        }
    };
    let mut settings = load_settings(store.as_ref());

    let mut orch = Orchestrator::new(engine);
    let default_color =
        color_from_string(&settings.player_color).unwrap_or(Color::White);
    orch.start_game(default_color, settings.difficulty);
    print_position(&orch);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            maybe = analysis_rx.recv() => {
                if let Some(update) = maybe {
                    orch.apply_analysis(&update);
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    _ => break,
                };
                if !handle_command(line.trim(), &mut orch, &mut *store, &mut settings).await {
                    break;
                }
            }
        }
    }

    if let Some(session) = &orch.engine().session {
        session.close();
    }
}

/// Spawn and handshake the engine. Failures are reported and the CLI
/// carries on without assistance. The unused sender keeps the fallback
/// channel open so the select loop never sees a closed receiver.
async fn start_engine(
    path: Option<PathBuf>,
) -> (
    Option<Arc<EngineSession>>,
    mpsc::UnboundedReceiver<AnalysisUpdate>,
    Option<mpsc::UnboundedSender<AnalysisUpdate>>,
) {
    let path = match path {
        Some(path) => path,
        None => {
            warn!("no engine path given (argument or ENGINE_PATH); playing without assistance");
            let (tx, rx) = mpsc::unbounded_channel();
            return (None, rx, Some(tx));
        }
    };
    match EngineSession::spawn_process(&path) {
        Ok(session) => {
            let session = Arc::new(session);
            match session.start().await {
                Ok(()) => {
                    info!("engine ready: {}", path.display());
                    let rx = session.subscribe_analysis();
                    (Some(session), rx, None)
                }
                Err(e) => {
                    warn!("engine handshake failed: {}; playing without assistance", e);
                    session.close();
                    let (tx, rx) = mpsc::unbounded_channel();
                    (None, rx, Some(tx))
                }
            }
        }
        Err(e) => {
            warn!("cannot start engine: {}; playing without assistance", e);
            let (tx, rx) = mpsc::unbounded_channel();
            (None, rx, Some(tx))
        }
    }
}

fn load_settings(store: &dyn KvStore) -> SettingsRecord {
    match store.get(SETTINGS_KEY) {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("corrupt settings record: {}; using defaults", e);
                SettingsRecord::default()
            }
        },
        None => SettingsRecord::default(),
    }
}

fn save_settings(store: &mut dyn KvStore, settings: &SettingsRecord) {
    match serde_json::to_string(settings) {
        Ok(json) => store.set(SETTINGS_KEY, json),
        Err(e) => warn!("failed to serialize settings: {}", e),
    }
}

/// Dispatch one REPL line. Returns `false` to quit.
async fn handle_command(
    line: &str,
    orch: &mut Orchestrator<CoachEngine>,
    store: &mut dyn KvStore,
    settings: &mut SettingsRecord,
) -> bool {
    let mut words = line.split_whitespace();
    let command = match words.next() {
        Some(word) => word,
        None => return true,
    };
    match command {
        "quit" | "exit" => return false,
        "help" => print_help(),
        "new" => {
            let mut color = color_from_string(&settings.player_color).unwrap_or(Color::White);
            let mut difficulty = settings.difficulty;
            for word in words {
                if let Some(parsed) = color_from_string(word) {
                    color = parsed;
                } else if let Ok(level) = word.parse::<u8>() {
                    difficulty = level.clamp(DIFFICULTY_MIN, DIFFICULTY_MAX);
                } else {
                    println!("unrecognized argument: {}", word);
                    return true;
                }
            }
            settings.player_color = if color == Color::White {
                "white".to_string()
            } else {
                "black".to_string()
            };
            settings.difficulty = difficulty;
            save_settings(store, settings);
            // A save from the previous match no longer applies.
            store.remove(SAVE_KEY);
            orch.start_game(color, difficulty);
            print_position(orch);
            drive_engine(orch).await;
        }
        "rematch" => {
            orch.rematch();
            print_position(orch);
            drive_engine(orch).await;
        }
        "move" => {
            let arg = words.next().unwrap_or("");
            play(orch, arg).await;
        }
        "hint" => match orch.match_state().best_hint() {
            Some(hint) => println!("engine suggests {}", hint),
            None => println!("no suggestion yet"),
        },
        "eval" => match orch.match_state().evaluation() {
            Some(eval) => match eval.score {
                Score::Cp(cp) => {
                    println!("{:+.2} at depth {}", cp as f64 / 100.0, eval.depth)
                }
                Score::Mate(n) => println!("mate in {} at depth {}", n, eval.depth),
            },
            None => println!("no evaluation yet"),
        },
        "moves" => {
            for entry in orch.timeline().entries().iter().skip(1) {
                if let Some(san) = &entry.notation {
                    print!("{} ", san);
                }
            }
            println!();
        }
        "back" => show_view(orch.view_back()),
        "forward" => show_view(orch.view_forward()),
        "start" => show_view(orch.view_start()),
        "end" => show_view(orch.view_end()),
        "takeback" => {
            if orch.take_back() {
                print_position(orch);
            } else {
                println!("nothing to take back");
            }
        }
        "resign" => {
            orch.resign();
            announce_result(orch);
        }
        "retry" => {
            orch.retry_engine_move();
            drive_engine(orch).await;
        }
        "score" => {
            if orch.match_state().phase() != Phase::Over {
                println!("scoring is available once the game is over");
                return true;
            }
            println!(
                "scoring {} positions at {} ms each",
                orch.timeline().entries().len(),
                SCORING_MOVETIME_MS
            );
            match orch.score_game(|done, total| println!("  {}/{}", done, total)).await {
                Some(series) => {
                    let rendered: Vec<String> =
                        series.iter().map(|cp| format!("{:+}", cp)).collect();
                    println!("cp per position (white view): {}", rendered.join(" "));
                }
                None => println!("scoring did not complete"),
            }
        }
        "save" => orch.save(store),
        "load" => {
            if orch.load(store) {
                print_position(orch);
                drive_engine(orch).await;
            } else {
                println!("no usable saved game");
            }
        }
        other => {
            // Bare coordinates are a move.
            if MoveSpec::from_uci(other).is_some() {
                play(orch, other).await;
            } else {
                println!("unknown command: {} (try help)", other);
            }
        }
    }
    true
}

async fn play(orch: &mut Orchestrator<CoachEngine>, arg: &str) {
    let spec = match MoveSpec::from_uci(arg) {
        Some(spec) => spec,
        None => {
            println!("moves are coordinates like e2e4 or e7e8q");
            return;
        }
    };
    match orch.play_move(spec) {
        PlayOutcome::Illegal => println!("illegal move"),
        PlayOutcome::NotPlaying => println!("no game in progress (try new)"),
        PlayOutcome::Replaying => println!("viewing history; use end to return to the game"),
        PlayOutcome::NotYourTurn => println!("waiting for the engine"),
        PlayOutcome::Played(result) => {
            println!("you played {}", result.san);
            drive_engine(orch).await;
        }
        PlayOutcome::GameOver(result, _) => {
            println!("you played {}", result.san);
            announce_result(orch);
        }
    }
}

/// Run the scheduled engine reply, if any, and report it.
async fn drive_engine(orch: &mut Orchestrator<CoachEngine>) {
    if !orch.has_scheduled_engine_reply() {
        return;
    }
    match orch.engine_reply().await {
        EngineReply::NotScheduled | EngineReply::Cancelled => {}
        EngineReply::NoMove => {
            println!("the engine has no reply right now; use retry to ask again")
        }
        EngineReply::Played(result) => {
            println!("engine plays {}", result.san);
            print_position(orch);
        }
        EngineReply::GameOver(result, _) => {
            println!("engine plays {}", result.san);
            announce_result(orch);
        }
    }
}

fn show_view(fen: Option<String>) {
    match fen {
        Some(fen) => {
            print_board(&fen);
            println!("{}", fen);
        }
        None => println!("already there"),
    }
}

fn announce_result(orch: &Orchestrator<CoachEngine>) {
    print_position(orch);
    match orch.match_state().winner() {
        Some(Winner::White) => println!("game over: white wins"),
        Some(Winner::Black) => println!("game over: black wins"),
        Some(Winner::Draw) => println!("game over: draw"),
        None => {}
    }
}

fn print_position(orch: &Orchestrator<CoachEngine>) {
    let fen = orch.match_state().fen();
    print_board(&fen);
    println!("{}", fen);
}

/// Render the piece-placement field of a FEN as an 8x8 diagram.
fn print_board(fen: &str) {
    let placement = fen.split_whitespace().next().unwrap_or("");
    for (i, rank) in placement.split('/').enumerate() {
        print!("{} ", 8 - i);
        for c in rank.chars() {
            if let Some(run) = c.to_digit(10) {
                for _ in 0..run {
                    print!(". ");
                }
            } else {
                print!("{} ", c);
            }
        }
        println!();
    }
    println!("  a b c d e f g h");
}

fn print_help() {
    println!("commands:");
    println!("  new [white|black] [1-10]   start a fresh game");
    println!("  rematch                    replay with the previous settings");
    println!("  <from><to>[promo]          play a move, e.g. e2e4 or e7e8q");
    println!("  hint / eval                engine suggestion / current evaluation");
    println!("  back / forward / start / end   step through the game record");
    println!("  takeback                   undo your last move");
    println!("  resign                     concede the game");
    println!("  retry                      ask the engine to move again");
    println!("  score                      evaluate every position of a finished game");
    println!("  save / load                persist or restore the match");
    println!("  moves                      print the move list");
    println!("  quit                       exit");
}
