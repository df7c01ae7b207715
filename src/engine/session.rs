//! Typed async session over the engine's line protocol.
//!
//! The session turns the stateless line stream into a disciplined
//! request/response surface: a capability/readiness handshake, at most one
//! outstanding best-move request (new requests supersede the old one), a
//! debounced continuous-analysis stream, and one-shot fixed-time scoring.
//!
//! Replies are matched to requests by a readiness resync: before a search
//! command is issued the session sends a readiness probe and waits for its
//! ack, so a best-move line still in flight from a stopped search drains
//! before the new callback is installed. Late lines that arrive with no
//! pending request are dropped.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{self, ANALYSIS_DEBOUNCE, BEST_MOVE_TIMEOUT, SCORING_GRACE};
use crate::engine::protocol::{self, AnalysisInfo, EngineEvent, EvalResult};
use crate::engine::transport::{self, EngineIo};
use crate::engine::{EngineBackend, EngineError};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Handshaking,
    Ready,
    Closed,
}

/// A streamed analysis line together with the position it was computed
/// for, so subscribers can drop updates that outlived their position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisUpdate {
    pub fen: String,
    pub info: AnalysisInfo,
}

struct Handshake {
    done: oneshot::Sender<Result<(), EngineError>>,
    capability_acked: bool,
}

struct PendingBest {
    token: u64,
    reply: oneshot::Sender<Option<String>>,
}

struct PendingScore {
    token: u64,
    last: Option<AnalysisInfo>,
    reply: oneshot::Sender<Option<EvalResult>>,
}

struct Inner {
    state: SessionState,
    outbound: mpsc::UnboundedSender<String>,
    handshake: Option<Handshake>,
    ready_waiters: VecDeque<oneshot::Sender<()>>,
    pending_best: Option<PendingBest>,
    pending_score: Option<PendingScore>,
    analysis_tx: Option<mpsc::UnboundedSender<AnalysisUpdate>>,
    /// Position the running analysis search was issued for; streamed
    /// lines are tagged with it.
    analysis_fen: Option<String>,
    /// Bumped whenever a pending debounced analysis start must not fire.
    analysis_generation: u64,
    next_token: u64,
}

impl Inner {
    fn send(&self, line: String) {
        debug!("engine <- {}", line);
        // A send failure means the transport is gone; the pump notices the
        // closed inbound channel and closes the session.
        let _ = self.outbound.send(line);
    }

    fn take_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn invalidate_analysis_start(&mut self) {
        self.analysis_generation += 1;
    }
}

pub struct EngineSession {
    inner: Arc<Mutex<Inner>>,
    pump: JoinHandle<()>,
    child: Mutex<Option<Child>>,
}

impl EngineSession {
    /// Attach to an already-established line transport.
    pub fn connect(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            state: SessionState::Unstarted,
            outbound,
            handshake: None,
            ready_waiters: VecDeque::new(),
            pending_best: None,
            pending_score: None,
            analysis_tx: None,
            analysis_fen: None,
            analysis_generation: 0,
            next_token: 0,
        }));
        let pump = tokio::spawn(Self::pump(Arc::clone(&inner), inbound));
        EngineSession { inner, pump, child: Mutex::new(None) }
    }

    /// Spawn the engine executable and attach to it.
    pub fn spawn_process(path: &Path) -> Result<Self, EngineError> {
        let (EngineIo { outbound, inbound }, child) = transport::spawn_engine_process(path)?;
        let session = Self::connect(outbound, inbound);
        *session.child.lock().unwrap() = Some(child);
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    /// Run the capability handshake and readiness probe. Resolves once the
    /// engine has acknowledged both; no timeout is imposed here, callers
    /// may wrap the future in one.
    pub async fn start(&self) -> Result<(), EngineError> {
        let done = {
            let mut g = self.inner.lock().unwrap();
            match g.state {
                SessionState::Unstarted => {}
                SessionState::Ready => return Ok(()),
                SessionState::Handshaking => {
                    return Err(EngineError::StartupFailed(
                        "handshake already in progress".to_string(),
                    ))
                }
                SessionState::Closed => return Err(EngineError::Closed),
            }
            let (tx, rx) = oneshot::channel();
            g.state = SessionState::Handshaking;
            g.handshake = Some(Handshake { done: tx, capability_acked: false });
            g.send(protocol::cmd_handshake());
            rx
        };
        match done.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::StartupFailed(
                "engine closed during handshake".to_string(),
            )),
        }
    }

    /// Map a 1-10 difficulty level onto the engine's skill option.
    /// Silently ignored unless the session is ready.
    pub fn set_strength(&self, level: u8) {
        let g = self.inner.lock().unwrap();
        if g.state != SessionState::Ready {
            return;
        }
        let cfg = config::difficulty_config(level);
        g.send(protocol::cmd_skill_level(cfg.skill_level));
    }

    /// Request a single best move for `fen` at the given difficulty.
    ///
    /// Supersedes any outstanding request (its future resolves `None`).
    /// Resolves `None` on timeout, decline or session failure; none of
    /// those are fatal to the session.
    pub async fn request_best_move(&self, fen: &str, level: u8) -> Option<String> {
        let deadline = Instant::now() + BEST_MOVE_TIMEOUT;

        let ready = {
            let mut g = self.inner.lock().unwrap();
            if g.state != SessionState::Ready {
                return None;
            }
            if let Some(prev) = g.pending_best.take() {
                let _ = prev.reply.send(None);
            }
            // Stop whatever is searching (previous request or analysis)
            // and resync before installing the new callback, so a stale
            // best-move line cannot be misattributed to this request.
            g.invalidate_analysis_start();
            g.send(protocol::cmd_stop());
            let (tx, rx) = oneshot::channel();
            g.ready_waiters.push_back(tx);
            g.send(protocol::cmd_ready_probe());
            rx
        };

        match tokio::time::timeout_at(deadline, ready).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return None, // session closed while syncing
            Err(_) => {
                warn!("best-move request timed out waiting for readiness");
                self.inner.lock().unwrap().send(protocol::cmd_stop());
                return None;
            }
        }

        let (token, reply) = {
            let mut g = self.inner.lock().unwrap();
            if g.state != SessionState::Ready {
                return None;
            }
            let token = g.take_token();
            let (tx, rx) = oneshot::channel();
            g.pending_best = Some(PendingBest { token, reply: tx });
            g.send(protocol::cmd_position(fen));
            g.send(protocol::cmd_go_depth(config::difficulty_config(level).depth));
            (token, rx)
        };

        match tokio::time::timeout_at(deadline, reply).await {
            Ok(Ok(mv)) => mv,
            Ok(Err(_)) => None,
            Err(_) => {
                warn!("best-move request timed out");
                let mut g = self.inner.lock().unwrap();
                // Only discard our own request; a superseding request may
                // already own the slot.
                if g.pending_best.as_ref().map_or(false, |p| p.token == token) {
                    g.pending_best = None;
                }
                g.send(protocol::cmd_stop());
                None
            }
        }
    }

    /// Begin continuous analysis of `fen`. A previous analysis is stopped
    /// first, and the search command itself is debounced so only the last
    /// call within the window takes effect.
    pub fn start_analysis(&self, fen: &str, max_depth: u32) {
        let generation = {
            let mut g = self.inner.lock().unwrap();
            if g.state != SessionState::Ready {
                return;
            }
            g.send(protocol::cmd_stop());
            g.invalidate_analysis_start();
            g.analysis_generation
        };
        let inner = Arc::clone(&self.inner);
        let fen = fen.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ANALYSIS_DEBOUNCE).await;
            let mut g = inner.lock().unwrap();
            if g.state == SessionState::Ready && g.analysis_generation == generation {
                g.send(protocol::cmd_position(&fen));
                g.send(protocol::cmd_go_depth(max_depth));
                g.analysis_fen = Some(fen);
            }
        });
    }

    /// Stop a running analysis search. Streamed lines already in flight
    /// are not filtered here; stale updates are the subscriber's to drop.
    pub fn stop_analysis(&self) {
        let mut g = self.inner.lock().unwrap();
        if g.state != SessionState::Ready {
            return;
        }
        g.invalidate_analysis_start();
        g.send(protocol::cmd_stop());
    }

    /// Subscribe to streamed analysis updates. Only the most recent
    /// subscriber receives updates.
    pub fn subscribe_analysis(&self) -> mpsc::UnboundedReceiver<AnalysisUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().analysis_tx = Some(tx);
        rx
    }

    /// One-shot fixed-time evaluation of `fen`, used for post-game
    /// scoring. Resolves with the final evaluation reported before the
    /// best-move line, or `None` on timeout/failure.
    pub async fn analyze_position(&self, fen: &str, movetime_ms: u64) -> Option<EvalResult> {
        let deadline = Instant::now() + Duration::from_millis(movetime_ms) + SCORING_GRACE;

        let ready = {
            let mut g = self.inner.lock().unwrap();
            if g.state != SessionState::Ready {
                return None;
            }
            if let Some(prev) = g.pending_score.take() {
                let _ = prev.reply.send(None);
            }
            g.invalidate_analysis_start();
            g.send(protocol::cmd_stop());
            let (tx, rx) = oneshot::channel();
            g.ready_waiters.push_back(tx);
            g.send(protocol::cmd_ready_probe());
            rx
        };

        match tokio::time::timeout_at(deadline, ready).await {
            Ok(Ok(())) => {}
            _ => return None,
        }

        let (token, reply) = {
            let mut g = self.inner.lock().unwrap();
            if g.state != SessionState::Ready {
                return None;
            }
            let token = g.take_token();
            let (tx, rx) = oneshot::channel();
            g.pending_score = Some(PendingScore { token, last: None, reply: tx });
            g.send(protocol::cmd_position(fen));
            g.send(protocol::cmd_go_movetime(movetime_ms));
            (token, rx)
        };

        match tokio::time::timeout_at(deadline, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => None,
            Err(_) => {
                warn!("position scoring timed out");
                let mut g = self.inner.lock().unwrap();
                if g.pending_score.as_ref().map_or(false, |p| p.token == token) {
                    g.pending_score = None;
                }
                g.send(protocol::cmd_stop());
                None
            }
        }
    }

    /// Send the quit command and release the process. Idempotent; all
    /// pending requests resolve `None`.
    pub fn close(&self) {
        {
            let mut g = self.inner.lock().unwrap();
            if g.state == SessionState::Closed {
                return;
            }
            g.state = SessionState::Closed;
            g.send(protocol::cmd_quit());
            if let Some(p) = g.pending_best.take() {
                let _ = p.reply.send(None);
            }
            if let Some(p) = g.pending_score.take() {
                let _ = p.reply.send(None);
            }
            g.ready_waiters.clear();
            g.analysis_tx = None;
        }
        self.pump.abort();
        self.child.lock().unwrap().take();
    }

    /// Dispatch loop for inbound engine lines.
    async fn pump(inner: Arc<Mutex<Inner>>, mut inbound: mpsc::UnboundedReceiver<String>) {
        while let Some(line) = inbound.recv().await {
            debug!("engine -> {}", line);
            let event = match protocol::parse_line(&line) {
                Some(event) => event,
                None => continue,
            };
            let mut g = inner.lock().unwrap();
            match event {
                EngineEvent::CapabilityAck => {
                    if let Some(handshake) = g.handshake.as_mut() {
                        if !handshake.capability_acked {
                            handshake.capability_acked = true;
                            g.send(protocol::cmd_ready_probe());
                        }
                    }
                }
                EngineEvent::ReadyAck => {
                    if g.handshake.as_ref().map_or(false, |h| h.capability_acked) {
                        if let Some(handshake) = g.handshake.take() {
                            g.state = SessionState::Ready;
                            let _ = handshake.done.send(Ok(()));
                        }
                    } else if let Some(waiter) = g.ready_waiters.pop_front() {
                        let _ = waiter.send(());
                    }
                }
                EngineEvent::Info(info) => {
                    if let Some(score) = g.pending_score.as_mut() {
                        score.last = Some(info);
                    } else if let (Some(tx), Some(fen)) =
                        (g.analysis_tx.as_ref(), g.analysis_fen.as_ref())
                    {
                        let _ = tx.send(AnalysisUpdate { fen: fen.clone(), info });
                    }
                }
                EngineEvent::BestMove(mv) => {
                    if let Some(pending) = g.pending_best.take() {
                        let _ = pending.reply.send(mv);
                    } else if let Some(pending) = g.pending_score.take() {
                        let result = pending
                            .last
                            .map(|info| EvalResult { score: info.score, depth: info.depth });
                        let _ = pending.reply.send(result);
                    } else {
                        debug!("dropping stale best-move line");
                    }
                }
            }
        }
        // Transport gone: the process died or the channel owner hung up.
        Self::fail_all(&inner);
    }

    fn fail_all(inner: &Arc<Mutex<Inner>>) {
        let mut g = inner.lock().unwrap();
        if g.state == SessionState::Closed {
            return;
        }
        warn!("engine transport lost; closing session");
        g.state = SessionState::Closed;
        if let Some(handshake) = g.handshake.take() {
            let _ = handshake
                .done
                .send(Err(EngineError::StartupFailed("engine process ended".to_string())));
        }
        g.ready_waiters.clear();
        if let Some(p) = g.pending_best.take() {
            let _ = p.reply.send(None);
        }
        if let Some(p) = g.pending_score.take() {
            let _ = p.reply.send(None);
        }
        g.analysis_tx = None;
    }
}

#[async_trait]
impl EngineBackend for EngineSession {
    async fn best_move(&self, fen: &str, level: u8) -> Option<String> {
        self.request_best_move(fen, level).await
    }

    async fn score_position(&self, fen: &str, movetime_ms: u64) -> Option<EvalResult> {
        self.analyze_position(fen, movetime_ms).await
    }

    fn set_strength(&self, level: u8) {
        EngineSession::set_strength(self, level);
    }

    fn start_analysis(&self, fen: &str, max_depth: u32) {
        EngineSession::start_analysis(self, fen, max_depth);
    }

    fn stop_analysis(&self) {
        EngineSession::stop_analysis(self);
    }
}
