//! Static position evaluation.
//!
//! Returns a centipawn score from the side-to-move's perspective: positive
//! means the side to move stands better. Combines material, piece-square
//! tables, bishop pair, pawn structure, rook files, mobility, king safety,
//! and a tapered middlegame/endgame interpolation.

use chess_core::{Color, Piece, Square};

use crate::movegen::{bishop_attacks, knight_attacks, rook_attacks};
use crate::position::CastlingRights;
use crate::{Bitboard, Position};

/// Per-piece material values in centipawns.
const PIECE_VALUE: [i32; 6] = [100, 320, 330, 500, 900, 0];

/// Non-pawn, non-king material contribution to the game phase, used to
/// interpolate between middlegame and endgame piece-square tables.
const PHASE_WEIGHT: [i32; 6] = [0, 1, 1, 2, 4, 0];
const TOTAL_PHASE: i32 = PHASE_WEIGHT[1] * 4 + PHASE_WEIGHT[2] * 4 + PHASE_WEIGHT[3] * 4 + PHASE_WEIGHT[4] * 2;

const BISHOP_PAIR_BONUS: i32 = 30;
const DOUBLED_PAWN_PENALTY: i32 = 10;
const ISOLATED_PAWN_PENALTY: i32 = 15;
const PASSED_PAWN_RANK_BONUS: [i32; 8] = [0, 5, 10, 20, 35, 60, 100, 0];
const ROOK_OPEN_FILE_BONUS: i32 = 20;
const ROOK_HALF_OPEN_FILE_BONUS: i32 = 10;
const MOBILITY_WEIGHT: [i32; 6] = [0, 4, 4, 2, 1, 0];
const KING_ZONE_ATTACK_PENALTY: i32 = 8;

/// Evaluates `position` from the side-to-move's perspective.
pub fn evaluate(position: &Position) -> i32 {
    let white = evaluate_side(position, Color::White);
    let black = evaluate_side(position, Color::Black);
    let score = white - black;
    match position.side_to_move {
        Color::White => score,
        Color::Black => -score,
    }
}

fn evaluate_side(position: &Position, color: Color) -> i32 {
    let phase = game_phase(position);
    let mut mg = 0i32;
    let mut eg = 0i32;

    for piece in Piece::ALL {
        for sq in position.pieces_of(piece, color) {
            mg += PIECE_VALUE[piece.index()] + pst_value(piece, color, sq, true);
            eg += PIECE_VALUE[piece.index()] + pst_value(piece, color, sq, false);
        }
    }

    let tapered = ((mg * phase) + (eg * (TOTAL_PHASE - phase))) / TOTAL_PHASE.max(1);

    tapered
        + bishop_pair(position, color)
        + pawn_structure(position, color)
        + rook_files(position, color)
        + mobility(position, color)
        + king_safety(position, color)
}

/// Phase in `[0, TOTAL_PHASE]`; `TOTAL_PHASE` is the full-material opening,
/// 0 is a bare-king-and-pawns endgame.
fn game_phase(position: &Position) -> i32 {
    let mut phase = 0;
    for color in [Color::White, Color::Black] {
        for piece in [Piece::Knight, Piece::Bishop, Piece::Rook, Piece::Queen] {
            phase += PHASE_WEIGHT[piece.index()] * position.pieces_of(piece, color).count() as i32;
        }
    }
    phase.min(TOTAL_PHASE)
}

fn mirror(sq: Square, color: Color) -> usize {
    match color {
        Color::White => sq.index() as usize,
        Color::Black => (sq.index() ^ 56) as usize,
    }
}

fn pst_value(piece: Piece, color: Color, sq: Square, middlegame: bool) -> i32 {
    let idx = mirror(sq, color);
    let table = match (piece, middlegame) {
        (Piece::Pawn, true) => &PAWN_MG,
        (Piece::Pawn, false) => &PAWN_EG,
        (Piece::Knight, _) => &KNIGHT_PST,
        (Piece::Bishop, _) => &BISHOP_PST,
        (Piece::Rook, _) => &ROOK_PST,
        (Piece::Queen, _) => &QUEEN_PST,
        (Piece::King, true) => &KING_MG,
        (Piece::King, false) => &KING_EG,
    };
    table[idx]
}

fn bishop_pair(position: &Position, color: Color) -> i32 {
    if position.pieces_of(Piece::Bishop, color).count() >= 2 {
        BISHOP_PAIR_BONUS
    } else {
        0
    }
}

fn pawn_structure(position: &Position, color: Color) -> i32 {
    let own_pawns = position.pieces_of(Piece::Pawn, color);
    let enemy_pawns = position.pieces_of(Piece::Pawn, color.opposite());
    let mut score = 0;

    for (file_idx, &file_mask) in Bitboard::FILES.iter().enumerate() {
        let count = (own_pawns & file_mask).count() as i32;
        if count >= 2 {
            score -= DOUBLED_PAWN_PENALTY * (count - 1);
        }
        if count > 0 {
            let left = file_idx.checked_sub(1).map(|f| Bitboard::FILES[f]).unwrap_or(Bitboard::EMPTY);
            let right = Bitboard::FILES.get(file_idx + 1).copied().unwrap_or(Bitboard::EMPTY);
            if (own_pawns & (left | right)).is_empty() {
                score -= ISOLATED_PAWN_PENALTY;
            }
        }
    }

    for sq in own_pawns {
        let file_idx = sq.file().index() as usize;
        let left = file_idx.checked_sub(1).map(|f| Bitboard::FILES[f]).unwrap_or(Bitboard::EMPTY);
        let right = Bitboard::FILES.get(file_idx + 1).copied().unwrap_or(Bitboard::EMPTY);
        let span_files = Bitboard::FILES[file_idx] | left | right;
        let ahead = ahead_mask(sq, color);
        if (enemy_pawns & span_files & ahead).is_empty() {
            let rank = match color {
                Color::White => sq.rank().index() as usize,
                Color::Black => 7 - sq.rank().index() as usize,
            };
            score += PASSED_PAWN_RANK_BONUS[rank];
        }
    }

    score
}

fn ahead_mask(sq: Square, color: Color) -> Bitboard {
    let rank = sq.rank().index();
    let mut mask = Bitboard::EMPTY;
    match color {
        Color::White => {
            for r in (rank + 1)..8 {
                mask = mask | Bitboard::new(0xFFu64 << (r * 8));
            }
        }
        Color::Black => {
            for r in 0..rank {
                mask = mask | Bitboard::new(0xFFu64 << (r * 8));
            }
        }
    }
    mask
}

fn rook_files(position: &Position, color: Color) -> i32 {
    let own_pawns = position.pieces_of(Piece::Pawn, color);
    let enemy_pawns = position.pieces_of(Piece::Pawn, color.opposite());
    let mut score = 0;

    for sq in position.pieces_of(Piece::Rook, color) {
        let file_mask = Bitboard::FILES[sq.file().index() as usize];
        let own_on_file = (own_pawns & file_mask).is_not_empty();
        let enemy_on_file = (enemy_pawns & file_mask).is_not_empty();
        if !own_on_file && !enemy_on_file {
            score += ROOK_OPEN_FILE_BONUS;
        } else if !own_on_file {
            score += ROOK_HALF_OPEN_FILE_BONUS;
        }
    }

    score
}

fn mobility(position: &Position, color: Color) -> i32 {
    let occupied = position.occupied();
    let own = position.colors[color.index()];
    let mut score = 0;

    for sq in position.pieces_of(Piece::Knight, color) {
        score += MOBILITY_WEIGHT[Piece::Knight.index()] * (knight_attacks(sq) & !own).count() as i32;
    }
    for sq in position.pieces_of(Piece::Bishop, color) {
        score += MOBILITY_WEIGHT[Piece::Bishop.index()] * (bishop_attacks(sq, occupied) & !own).count() as i32;
    }
    for sq in position.pieces_of(Piece::Rook, color) {
        score += MOBILITY_WEIGHT[Piece::Rook.index()] * (rook_attacks(sq, occupied) & !own).count() as i32;
    }

    score
}

fn king_safety(position: &Position, color: Color) -> i32 {
    let enemy = color.opposite();
    let Some(king_sq) = position.pieces_of(Piece::King, color).into_iter().next() else {
        return 0;
    };
    let zone = knight_attacks(king_sq) | crate::movegen::king_attacks(king_sq) | Bitboard::from_square(king_sq);
    let occupied = position.occupied();

    let mut attackers = 0;
    for sq in position.pieces_of(Piece::Knight, enemy) {
        if (knight_attacks(sq) & zone).is_not_empty() {
            attackers += 1;
        }
    }
    for sq in position.pieces_of(Piece::Bishop, enemy) {
        if (bishop_attacks(sq, occupied) & zone).is_not_empty() {
            attackers += 1;
        }
    }
    for sq in position.pieces_of(Piece::Rook, enemy) {
        if (rook_attacks(sq, occupied) & zone).is_not_empty() {
            attackers += 1;
        }
    }
    for sq in position.pieces_of(Piece::Queen, enemy) {
        if ((bishop_attacks(sq, occupied) | rook_attacks(sq, occupied)) & zone).is_not_empty() {
            attackers += 1;
        }
    }

    -KING_ZONE_ATTACK_PENALTY * attackers
}

/// K-vs-K, K+minor-vs-K, and same-colored-bishops K+B-vs-K+B are drawn.
pub fn is_insufficient_material(position: &Position) -> bool {
    if position.pieces_of(Piece::Pawn, Color::White).is_not_empty()
        || position.pieces_of(Piece::Pawn, Color::Black).is_not_empty()
        || position.pieces_of(Piece::Rook, Color::White).is_not_empty()
        || position.pieces_of(Piece::Rook, Color::Black).is_not_empty()
        || position.pieces_of(Piece::Queen, Color::White).is_not_empty()
        || position.pieces_of(Piece::Queen, Color::Black).is_not_empty()
    {
        return false;
    }

    let white_minors =
        position.pieces_of(Piece::Knight, Color::White).count() + position.pieces_of(Piece::Bishop, Color::White).count();
    let black_minors =
        position.pieces_of(Piece::Knight, Color::Black).count() + position.pieces_of(Piece::Bishop, Color::Black).count();

    match (white_minors, black_minors) {
        (0, 0) => true,
        (1, 0) | (0, 1) => position.pieces_of(Piece::Knight, Color::White).count() <= 1
            && position.pieces_of(Piece::Knight, Color::Black).count() <= 1,
        (1, 1) => {
            let w_bishop = position.pieces_of(Piece::Bishop, Color::White);
            let b_bishop = position.pieces_of(Piece::Bishop, Color::Black);
            if w_bishop.is_not_empty() && b_bishop.is_not_empty() {
                let w_light = (w_bishop & Bitboard::LIGHT_SQUARES).is_not_empty();
                let b_light = (b_bishop & Bitboard::LIGHT_SQUARES).is_not_empty();
                w_light == b_light
            } else {
                false
            }
        }
        _ => false,
    }
}

#[rustfmt::skip]
const PAWN_MG: [i32; 64] = [
     0,  0,  0,  0,  0,  0,  0,  0,
     5, 10, 10,-20,-20, 10, 10,  5,
     5, -5,-10,  0,  0,-10, -5,  5,
     0,  0,  0, 20, 20,  0,  0,  0,
     5,  5, 10, 25, 25, 10,  5,  5,
    10, 10, 20, 30, 30, 20, 10, 10,
    50, 50, 50, 50, 50, 50, 50, 50,
     0,  0,  0,  0,  0,  0,  0,  0,
];

#[rustfmt::skip]
const PAWN_EG: [i32; 64] = [
     0,  0,  0,  0,  0,  0,  0,  0,
    10, 10, 10, 10, 10, 10, 10, 10,
    20, 20, 20, 20, 20, 20, 20, 20,
    35, 35, 35, 35, 35, 35, 35, 35,
    55, 55, 55, 55, 55, 55, 55, 55,
    80, 80, 80, 80, 80, 80, 80, 80,
   120,120,120,120,120,120,120,120,
     0,  0,  0,  0,  0,  0,  0,  0,
];

#[rustfmt::skip]
const KNIGHT_PST: [i32; 64] = [
    -50,-40,-30,-30,-30,-30,-40,-50,
    -40,-20,  0,  5,  5,  0,-20,-40,
    -30,  5, 10, 15, 15, 10,  5,-30,
    -30,  0, 15, 20, 20, 15,  0,-30,
    -30,  5, 15, 20, 20, 15,  5,-30,
    -30,  0, 10, 15, 15, 10,  0,-30,
    -40,-20,  0,  0,  0,  0,-20,-40,
    -50,-40,-30,-30,-30,-30,-40,-50,
];

#[rustfmt::skip]
const BISHOP_PST: [i32; 64] = [
    -20,-10,-10,-10,-10,-10,-10,-20,
    -10,  5,  0,  0,  0,  0,  5,-10,
    -10, 10, 10, 10, 10, 10, 10,-10,
    -10,  0, 10, 10, 10, 10,  0,-10,
    -10,  5,  5, 10, 10,  5,  5,-10,
    -10,  0,  5, 10, 10,  5,  0,-10,
    -10,  0,  0,  0,  0,  0,  0,-10,
    -20,-10,-10,-10,-10,-10,-10,-20,
];

#[rustfmt::skip]
const ROOK_PST: [i32; 64] = [
     0,  0,  0,  0,  0,  0,  0,  0,
     5, 10, 10, 10, 10, 10, 10,  5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
     0,  0,  0,  5,  5,  0,  0,  0,
];

#[rustfmt::skip]
const QUEEN_PST: [i32; 64] = [
    -20,-10,-10, -5, -5,-10,-10,-20,
    -10,  0,  0,  0,  0,  0,  0,-10,
    -10,  0,  5,  5,  5,  5,  0,-10,
     -5,  0,  5,  5,  5,  5,  0, -5,
      0,  0,  5,  5,  5,  5,  0, -5,
    -10,  5,  5,  5,  5,  5,  0,-10,
    -10,  0,  5,  0,  0,  0,  0,-10,
    -20,-10,-10, -5, -5,-10,-10,-20,
];

#[rustfmt::skip]
const KING_MG: [i32; 64] = [
    -30,-40,-40,-50,-50,-40,-40,-30,
    -30,-40,-40,-50,-50,-40,-40,-30,
    -30,-40,-40,-50,-50,-40,-40,-30,
    -30,-40,-40,-50,-50,-40,-40,-30,
    -20,-30,-30,-40,-40,-30,-30,-20,
    -10,-20,-20,-20,-20,-20,-20,-10,
     20, 20,  0,  0,  0,  0, 20, 20,
     20, 30, 10,  0,  0, 10, 30, 20,
];

#[rustfmt::skip]
const KING_EG: [i32; 64] = [
    -50,-40,-30,-20,-20,-30,-40,-50,
    -30,-20,-10,  0,  0,-10,-20,-30,
    -30,-10, 20, 30, 30, 20,-10,-30,
    -30,-10, 30, 40, 40, 30,-10,-30,
    -30,-10, 30, 40, 40, 30,-10,-30,
    -30,-10, 20, 30, 30, 20,-10,-30,
    -30,-30,  0,  0,  0,  0,-30,-30,
    -50,-30,-30,-30,-30,-30,-30,-50,
];
