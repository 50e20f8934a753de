//! Iterative-deepening alpha-beta negamax search.
//!
//! Orchestrates move generation, the evaluator, the transposition table,
//! and move ordering under a time or depth budget. Single-threaded,
//! cooperatively cancelled: the stop flag is polled every 2048 nodes and
//! after every completed iterative-deepening iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chess_core::{Color, Move};

use crate::eval::evaluate;
use crate::movegen::{generate_moves, is_king_attacked, make_move};
use crate::ordering::{score_move, select_next, HistoryTable, KillerTable, MAX_PLY};
use crate::tt::{Bound, TranspositionTable, MATE_SCORE, NEAR_MATE};
use crate::Position;

/// Budget and options for a single `think()` call, mirroring the UCI `go`
/// command's recognized options.
#[derive(Debug, Clone, Default)]
pub struct SearchLimits {
    pub max_depth: Option<u8>,
    pub move_time_ms: Option<u64>,
    pub white_time_ms: Option<u64>,
    pub black_time_ms: Option<u64>,
    pub white_inc_ms: Option<u64>,
    pub black_inc_ms: Option<u64>,
    pub moves_to_go: Option<u32>,
    pub infinite: bool,
}

/// The outcome of one completed iterative-deepening iteration.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub best_move: Move,
    pub score: i32,
    pub depth_reached: u8,
    pub nodes_searched: u64,
    pub elapsed_ms: u64,
    pub principal_variation: Vec<Move>,
    pub hashfull: u32,
}

struct TimeBudget {
    start: Instant,
    hard: Option<Duration>,
    soft: Option<Duration>,
}

impl TimeBudget {
    fn new(limits: &SearchLimits, side: Color) -> Self {
        let start = Instant::now();

        if let Some(mt) = limits.move_time_ms {
            let budget = Duration::from_millis(mt.saturating_sub(20));
            return TimeBudget {
                start,
                hard: Some(budget),
                soft: Some(budget),
            };
        }

        if limits.infinite {
            return TimeBudget { start, hard: None, soft: None };
        }

        let (time, inc) = match side {
            Color::White => (limits.white_time_ms, limits.white_inc_ms.unwrap_or(0)),
            Color::Black => (limits.black_time_ms, limits.black_inc_ms.unwrap_or(0)),
        };

        let Some(time) = time else {
            return TimeBudget { start, hard: None, soft: None };
        };

        let movestogo = limits.moves_to_go.unwrap_or(30).max(1) as u64;
        let soft_ms = ((time / movestogo) + (inc * 3 / 4)).min(time / 5);
        let hard_ms = (time / 2).max(soft_ms);

        TimeBudget {
            start,
            hard: Some(Duration::from_millis(hard_ms)),
            soft: Some(Duration::from_millis(soft_ms)),
        }
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn hard_expired(&self) -> bool {
        matches!(self.hard, Some(limit) if self.elapsed() > limit)
    }

    /// True if starting another iteration is unlikely to finish in time:
    /// elapsed already exceeds roughly a third of the soft budget.
    fn should_stop_deepening(&self) -> bool {
        match self.soft {
            Some(limit) => self.elapsed() > limit / 3,
            None => false,
        }
    }
}

struct PvTable {
    moves: Box<[[Move; MAX_PLY]; MAX_PLY]>,
    len: [usize; MAX_PLY],
}

impl PvTable {
    fn new() -> Self {
        PvTable {
            moves: Box::new([[Move::NULL; MAX_PLY]; MAX_PLY]),
            len: [0; MAX_PLY],
        }
    }

    fn update(&mut self, ply: usize, m: Move) {
        self.moves[ply][0] = m;
        let child_len = self.len[ply + 1];
        for i in 0..child_len {
            self.moves[ply][i + 1] = self.moves[ply + 1][i];
        }
        self.len[ply] = child_len + 1;
    }

    fn clear_ply(&mut self, ply: usize) {
        self.len[ply] = 0;
    }

    fn line(&self) -> Vec<Move> {
        self.moves[0][..self.len[0]].to_vec()
    }
}

struct SearchContext<'a> {
    tt: &'a mut TranspositionTable,
    killers: KillerTable,
    history: HistoryTable,
    pv: PvTable,
    nodes: u64,
    stop: Arc<AtomicBool>,
    time: TimeBudget,
    aborted: bool,
    repetition_history: Vec<u64>,
}

impl<'a> SearchContext<'a> {
    fn should_stop(&mut self) -> bool {
        if self.aborted {
            return true;
        }
        if self.nodes & 2047 == 0 && (self.stop.load(Ordering::Relaxed) || self.time.hard_expired()) {
            tracing::debug!(nodes = self.nodes, "search aborted: stop flag or time budget hit");
            self.aborted = true;
        }
        self.aborted
    }

    fn is_repetition(&self, hash: u64) -> bool {
        self.repetition_history.iter().filter(|&&h| h == hash).count() >= 1
    }
}

/// Runs iterative deepening from depth 1 until `limits` is exhausted,
/// returning the result of the last fully completed iteration. `history` is
/// the game's Zobrist-hash history since the last irreversible move, used
/// for repetition detection. `on_info` is called after every completed
/// iteration, mirroring the UCI `info` line the protocol driver emits.
pub fn think(
    root: &Position,
    history: &[u64],
    limits: &SearchLimits,
    tt: &mut TranspositionTable,
    stop: Arc<AtomicBool>,
    mut on_info: impl FnMut(&SearchResult),
) -> SearchResult {
    tt.new_search();

    let mut ctx = SearchContext {
        tt,
        killers: KillerTable::new(),
        history: HistoryTable::new(),
        pv: PvTable::new(),
        nodes: 0,
        stop,
        time: TimeBudget::new(limits, root.side_to_move),
        aborted: false,
        repetition_history: history.to_vec(),
    };

    let max_depth = limits.max_depth.unwrap_or(64).min(MAX_PLY as u8 - 1);
    tracing::debug!(max_depth, ?limits, "starting iterative deepening");
    let mut result = SearchResult {
        best_move: Move::NULL,
        score: 0,
        depth_reached: 0,
        nodes_searched: 0,
        elapsed_ms: 0,
        principal_variation: Vec::new(),
        hashfull: 0,
    };

    for depth in 1..=max_depth {
        ctx.pv.clear_ply(0);
        let score = negamax(&mut ctx, root, depth as i32, 0, -MATE_SCORE, MATE_SCORE, true);

        if ctx.aborted && depth > 1 {
            break;
        }

        let pv = ctx.pv.line();
        result = SearchResult {
            best_move: pv.first().copied().unwrap_or(Move::NULL),
            score,
            depth_reached: depth,
            nodes_searched: ctx.nodes,
            elapsed_ms: ctx.time.elapsed().as_millis() as u64,
            principal_variation: pv,
            hashfull: ctx.tt.permille_full(),
        };
        on_info(&result);

        if ctx.aborted || ctx.time.should_stop_deepening() {
            break;
        }
    }

    // A search must return a legal move even under an exhausted budget:
    // fall back to the first legal move at depth 1 semantics.
    if result.best_move == Move::NULL {
        let moves = generate_moves(root);
        if let Some(&m) = moves.as_slice().first() {
            result.best_move = m;
        }
    }

    result
}

#[allow(clippy::too_many_arguments)]
fn negamax(
    ctx: &mut SearchContext,
    position: &Position,
    mut depth: i32,
    ply: i32,
    mut alpha: i32,
    beta: i32,
    is_pv: bool,
) -> i32 {
    ctx.pv.clear_ply(ply as usize + 1);

    if ctx.should_stop() {
        return 0;
    }

    if ply as usize >= MAX_PLY - 1 {
        return evaluate(position);
    }

    if ply > 0 {
        if position.halfmove_clock >= 100 || ctx.is_repetition(position.zobrist_hash()) {
            return 0;
        }

        // Mate-distance pruning: tighten the window against the best and
        // worst possible mate scores reachable from this ply.
        let mate_alpha = alpha.max(-MATE_SCORE + ply);
        let mate_beta = beta.min(MATE_SCORE - ply);
        if mate_alpha >= mate_beta {
            return mate_alpha;
        }
        alpha = mate_alpha;
    }

    if depth <= 0 {
        return quiescence(ctx, position, alpha, beta, ply);
    }

    ctx.nodes += 1;

    let hash = position.zobrist_hash();
    let mut tt_move = None;
    if let Some(probe) = ctx.tt.probe(hash, ply) {
        tt_move = probe.best_move;
        if probe.depth as i32 >= depth {
            let usable = match probe.bound {
                Bound::Exact => true,
                Bound::Lower => probe.score >= beta,
                Bound::Upper => probe.score <= alpha,
            };
            if usable && !is_pv {
                return probe.score;
            }
        }
    }

    let in_check = is_king_attacked(position, position.side_to_move);
    if in_check {
        depth += 1;
    }

    let static_eval = if in_check { -MATE_SCORE } else { evaluate(position) };

    // Null-move pruning: skip our move entirely and see if the opponent
    // still cannot reach beta. Disabled in check, at the root, and when the
    // side to move has only pawns (zugzwang risk).
    if !is_pv
        && !in_check
        && ply > 0
        && depth >= 3
        && static_eval >= beta
        && has_non_pawn_material(position, position.side_to_move)
    {
        let null_pos = make_null_move(position);
        let score = -negamax(ctx, &null_pos, depth - 1 - 3, ply + 1, -beta, -beta + 1, false);
        if ctx.aborted {
            return 0;
        }
        if score >= beta && score.abs() < NEAR_MATE {
            return beta;
        }
    }

    let moves = generate_moves(position);

    if moves.is_empty() {
        return if in_check { -MATE_SCORE + ply } else { 0 };
    }

    let mut move_slice: Vec<Move> = moves.as_slice().to_vec();
    let mut scores: Vec<i32> = move_slice
        .iter()
        .map(|m| score_move(position, *m, tt_move, ply as usize, &ctx.killers, &ctx.history))
        .collect();

    let mut best_score = -MATE_SCORE;
    let mut best_move = Move::NULL;
    let mut bound = Bound::Upper;
    let original_alpha = alpha;

    let mut move_index = 0;
    while select_next(&mut move_slice, &mut scores, move_index) {
        let m = move_slice[move_index];
        move_index += 1;

        let next_pos = make_move(position, m);
        ctx.repetition_history.push(position.zobrist_hash());

        let is_capture = position.piece_at(m.to()).is_some() || m.flag() == chess_core::MoveFlag::EnPassant;
        let is_quiet = !is_capture && m.flag().promotion_piece().is_none();

        let score = if move_index == 1 {
            -negamax(ctx, &next_pos, depth - 1, ply + 1, -beta, -alpha, is_pv)
        } else {
            let mut reduction = 0;
            if depth >= 3 && move_index > 3 && is_quiet && !in_check {
                reduction = 1 + (depth / 6);
            }
            let reduced_depth = (depth - 1 - reduction).max(0);
            let mut score = -negamax(ctx, &next_pos, reduced_depth, ply + 1, -alpha - 1, -alpha, false);
            if score > alpha && (reduction > 0 || score < beta) {
                score = -negamax(ctx, &next_pos, depth - 1, ply + 1, -beta, -alpha, is_pv);
            }
            score
        };

        ctx.repetition_history.pop();

        if ctx.aborted {
            return 0;
        }

        if score > best_score {
            best_score = score;
            best_move = m;
        }

        if score > alpha {
            alpha = score;
            bound = Bound::Exact;
            ctx.pv.update(ply as usize, m);
            if !is_capture && m.flag().promotion_piece().is_none() {
                ctx.history.bonus(m, depth);
            }
        }

        if alpha >= beta {
            bound = Bound::Lower;
            if is_quiet {
                ctx.killers.record(ply as usize, m);
            }
            break;
        }
    }

    let _ = original_alpha;
    ctx.tt.store(hash, depth.min(i8::MAX as i32) as i8, bound, best_score, Some(best_move), ply);

    best_score
}

fn quiescence(ctx: &mut SearchContext, position: &Position, mut alpha: i32, beta: i32, ply: i32) -> i32 {
    ctx.nodes += 1;
    if ctx.should_stop() {
        return 0;
    }

    let in_check = is_king_attacked(position, position.side_to_move);
    let stand_pat = evaluate(position);

    if !in_check {
        if stand_pat >= beta {
            return beta;
        }
        if stand_pat > alpha {
            alpha = stand_pat;
        }
    }

    let mut moves = generate_moves(position);
    if !in_check {
        moves.retain(|m| position.piece_at(m.to()).is_some() || m.flag() == chess_core::MoveFlag::EnPassant);
    }

    if moves.is_empty() {
        return if in_check { -MATE_SCORE + ply } else { alpha };
    }

    let move_slice = moves.as_slice();
    let scores: Vec<i32> = move_slice
        .iter()
        .map(|m| score_move(position, *m, None, ply as usize, &ctx.killers, &ctx.history))
        .collect();
    let mut ordered: Vec<(Move, i32)> = move_slice.iter().copied().zip(scores).collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1));

    for (m, _) in ordered {
        // Delta pruning: a capture that cannot possibly raise alpha even
        // with the largest plausible material swing is skipped.
        if !in_check {
            let victim_value = position
                .piece_at(m.to())
                .map(|(p, _)| material_value(p))
                .unwrap_or(100);
            if stand_pat + victim_value + 200 < alpha {
                continue;
            }
        }

        let next_pos = make_move(position, m);
        let score = -quiescence(ctx, &next_pos, -beta, -alpha, ply + 1);
        if ctx.aborted {
            return 0;
        }

        if score >= beta {
            return beta;
        }
        if score > alpha {
            alpha = score;
        }
    }

    alpha
}

fn material_value(piece: chess_core::Piece) -> i32 {
    match piece {
        chess_core::Piece::Pawn => 100,
        chess_core::Piece::Knight => 320,
        chess_core::Piece::Bishop => 330,
        chess_core::Piece::Rook => 500,
        chess_core::Piece::Queen => 900,
        chess_core::Piece::King => 0,
    }
}

fn has_non_pawn_material(position: &Position, color: Color) -> bool {
    use chess_core::Piece;
    [Piece::Knight, Piece::Bishop, Piece::Rook, Piece::Queen]
        .iter()
        .any(|&p| position.pieces_of(p, color).is_not_empty())
}

/// Passes the turn without moving, for null-move pruning only.
fn make_null_move(position: &Position) -> Position {
    let mut null_pos = position.clone();
    if let Some(ep) = position.en_passant {
        null_pos.hash ^= crate::zobrist::ZOBRIST.en_passant_key(ep.file().index() as usize);
    }
    null_pos.en_passant = None;
    null_pos.side_to_move = position.side_to_move.opposite();
    null_pos.hash ^= crate::zobrist::ZOBRIST.black_to_move;
    null_pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn finds_mate_in_one() {
        // Black king on h8 boxed in; white queen delivers mate on g7 is not
        // legal (adjacent), use a clean back-rank mate instead.
        let position = Position::from_fen("6k1/8/6K1/8/8/8/8/7Q w - - 0 1").unwrap();
        let mut tt = TranspositionTable::new(1);
        let limits = SearchLimits {
            max_depth: Some(3),
            ..Default::default()
        };
        let stop = Arc::new(AtomicBool::new(false));
        let result = think(&position, &[], &limits, &mut tt, stop, |_| {});
        assert!(result.score > NEAR_MATE || result.score == MATE_SCORE - 1);
    }

    #[test]
    fn returns_a_legal_move_under_zero_budget() {
        let position = Position::startpos();
        let mut tt = TranspositionTable::new(1);
        let limits = SearchLimits {
            move_time_ms: Some(0),
            ..Default::default()
        };
        let stop = Arc::new(AtomicBool::new(false));
        let result = think(&position, &[], &limits, &mut tt, stop, |_| {});
        assert_ne!(result.best_move, Move::NULL);
    }

    #[test]
    fn stop_flag_halts_search() {
        let position = Position::startpos();
        let mut tt = TranspositionTable::new(1);
        let limits = SearchLimits {
            infinite: true,
            ..Default::default()
        };
        let stop = Arc::new(AtomicBool::new(true));
        let result = think(&position, &[], &limits, &mut tt, stop, |_| {});
        assert_ne!(result.best_move, Move::NULL);
    }
}
