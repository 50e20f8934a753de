//! UCI protocol driver.
//!
//! Owns the root [`Game`] and wires the `uci` protocol crate to
//! `chess_engine::search::think`. Per the two-actor concurrency model: this
//! loop is the protocol actor, reading commands from stdin and remaining
//! responsive to `stop`/`quit`; `go` spawns the search actor on a background
//! thread that observes a shared `Arc<AtomicBool>` stop flag every 2048
//! nodes. The transposition table is a single long-lived allocation shared
//! across searches via `Arc<Mutex<_>>` and is never reallocated mid-game.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chess_core::Move;
use chess_engine::{think, Game, SearchLimits, SearchResult, TranspositionTable, DEFAULT_MB, MATE_SCORE, NEAR_MATE};
use uci::{EngineMessage, GoOptions, GuiCommand, InfoBuilder, Score};

const ENGINE_NAME: &str = "chess-engine";
const ENGINE_AUTHOR: &str = "chess-engine contributors";

/// Holds the background search thread and the flag used to cancel it.
struct SearchHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl SearchHandle {
    /// Sets the stop flag and blocks until the search thread has returned,
    /// satisfying the ordering guarantee that a new `think()` must not
    /// begin until the previous one has observed `stop` and returned.
    fn join(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.thread.join();
    }
}

struct Driver {
    game: Game,
    tt: Arc<Mutex<TranspositionTable>>,
    search: Option<SearchHandle>,
}

impl Driver {
    fn new() -> Self {
        let (tt, fallback) = TranspositionTable::try_new(DEFAULT_MB);
        if let Some(err) = fallback {
            tracing::warn!(%err, "transposition table sized down at startup");
        }
        Driver {
            game: Game::new(),
            tt: Arc::new(Mutex::new(tt)),
            search: None,
        }
    }

    fn join_outstanding_search(&mut self) {
        if let Some(handle) = self.search.take() {
            handle.join();
        }
    }

    fn handle_uci(&mut self) {
        send(&EngineMessage::Id {
            name: Some(ENGINE_NAME.to_string()),
            author: Some(ENGINE_AUTHOR.to_string()),
        });
        println!("option name Hash type spin default {DEFAULT_MB} min 1 max 4096");
        send(&EngineMessage::UciOk);
    }

    fn handle_isready(&mut self) {
        // No asynchronous init work remains outstanding once any running
        // search has been joined, per "readyok once prior work is drained".
        self.join_outstanding_search();
        send(&EngineMessage::ReadyOk);
    }

    fn handle_newgame(&mut self) {
        self.join_outstanding_search();
        self.game = Game::new();
        self.tt.lock().unwrap().clear();
    }

    fn handle_position(&mut self, fen: Option<String>, moves: Vec<String>) {
        self.join_outstanding_search();
        self.game = match fen {
            Some(f) => match Game::from_fen(&f) {
                Ok(g) => g,
                Err(e) => {
                    tracing::warn!(fen = %f, error = %e, "unparseable FEN, ignoring position command");
                    return;
                }
            },
            None => Game::new(),
        };

        for mv in moves {
            if let Err(e) = self.game.make_move_uci(&mv) {
                tracing::warn!(mv = %mv, error = %e, "move text did not match a legal move, dropping rest of position command");
                break;
            }
        }
    }

    fn handle_go(&mut self, opts: GoOptions) {
        self.join_outstanding_search();

        if self.game.is_game_over() {
            send(&EngineMessage::BestMove { mv: "0000".to_string(), ponder: None });
            return;
        }

        let limits = SearchLimits {
            max_depth: opts.depth.map(|d| d.min(u8::MAX as u32) as u8),
            move_time_ms: opts.movetime,
            white_time_ms: opts.wtime,
            black_time_ms: opts.btime,
            white_inc_ms: opts.winc,
            black_inc_ms: opts.binc,
            moves_to_go: opts.movestogo,
            infinite: opts.infinite,
        };

        let root = self.game.position().clone();
        let history: Vec<u64> = self
            .game
            .move_history()
            .iter()
            .map(|m| m.hash_before)
            .chain(std::iter::once(root.zobrist_hash()))
            .collect();
        let tt = Arc::clone(&self.tt);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);

        let thread = thread::spawn(move || {
            let mut tt = tt.lock().unwrap();
            let result = think(&root, &history, &limits, &mut tt, stop_for_thread, |r| {
                emit_info(r);
            });
            emit_bestmove(result.best_move);
        });

        self.search = Some(SearchHandle { stop, thread });
    }

    fn handle_stop(&mut self) {
        self.join_outstanding_search();
    }

    fn handle_quit(&mut self) {
        self.join_outstanding_search();
    }
}

fn emit_info(result: &SearchResult) {
    let mut builder = InfoBuilder::new()
        .depth(result.depth_reached as u32)
        .nodes(result.nodes_searched)
        .time(result.elapsed_ms)
        .hashfull(result.hashfull)
        .pv(result.principal_variation.iter().map(|m| m.to_uci()).collect());

    let nps = if result.elapsed_ms > 0 {
        result.nodes_searched * 1000 / result.elapsed_ms
    } else {
        0
    };
    builder = builder.nps(nps);

    builder = match to_score(result.score) {
        Score::Cp(cp) => builder.score_cp(cp),
        Score::Mate(m) => builder.score_mate(m),
    };

    send(&EngineMessage::Info(builder.build()));
}

fn emit_bestmove(m: Move) {
    send(&EngineMessage::BestMove { mv: m.to_uci(), ponder: None });
}

/// Converts a root-relative centipawn score into a UCI `Score`, reporting
/// mate distances in plies-to-moves per the `score mate K` convention.
fn to_score(score: i32) -> Score {
    if score.abs() > NEAR_MATE {
        let plies_to_mate = MATE_SCORE - score.abs();
        let moves_to_mate = (plies_to_mate + 1) / 2;
        Score::Mate(if score > 0 { moves_to_mate } else { -moves_to_mate })
    } else {
        Score::Cp(score)
    }
}

fn send(msg: &EngineMessage) {
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "{}", msg.to_uci());
    let _ = stdout.flush();
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let stdin = std::io::stdin();
    let mut driver = Driver::new();

    loop {
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "error reading command from stdin");
                continue;
            }
        }

        let cmd = match GuiCommand::parse(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(line = %line.trim(), error = %e, "unparseable command, dropping");
                continue;
            }
        };

        match cmd {
            GuiCommand::Uci => driver.handle_uci(),
            GuiCommand::Extensions => send(&EngineMessage::ExtensionsOk),
            GuiCommand::IsReady => driver.handle_isready(),
            GuiCommand::UciNewGame => driver.handle_newgame(),
            GuiCommand::Position { fen, moves } => driver.handle_position(fen, moves),
            GuiCommand::Go(opts) => driver.handle_go(opts),
            GuiCommand::Stop => driver.handle_stop(),
            GuiCommand::Quit => {
                driver.handle_quit();
                break;
            }
            GuiCommand::Unknown(cmd) => {
                tracing::debug!(cmd = %cmd, "unknown command, dropping");
            }
        }
    }
}
