//! Transposition table.
//!
//! A fixed-size, power-of-two-indexed array of small clusters. Each cluster
//! holds a handful of entries to reduce collision loss versus a single slot
//! per index. Mate scores are stored as distance-to-mate from the current
//! node (not from the root) so that an entry remains valid regardless of
//! the ply at which it is probed or stored.

use chess_core::Move;

use crate::error::SearchError;

/// Bound type recorded with a stored score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// The stored score is the exact minimax value.
    Exact,
    /// The stored score is a lower bound (search failed high / beta cutoff).
    Lower,
    /// The stored score is an upper bound (search failed low, alpha unchanged).
    Upper,
}

/// A score close enough to a mate score that it must be treated specially
/// by ply-normalization and null-move pruning.
pub const MATE_SCORE: i32 = 100_000;
pub const NEAR_MATE: i32 = MATE_SCORE - 1_000;

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: u64,
    depth: i8,
    bound: Bound,
    score: i32,
    best_move: Move,
    age: u8,
}

impl Entry {
    const EMPTY: Entry = Entry {
        key: 0,
        depth: -1,
        bound: Bound::Exact,
        score: 0,
        best_move: Move::NULL,
        age: 0,
    };
}

const CLUSTER_SIZE: usize = 4;

#[derive(Debug, Clone, Copy)]
struct Cluster {
    entries: [Entry; CLUSTER_SIZE],
}

impl Cluster {
    const EMPTY: Cluster = Cluster {
        entries: [Entry::EMPTY; CLUSTER_SIZE],
    };
}

/// A probe result, with the score already un-normalized for the querying ply.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub depth: i8,
    pub bound: Bound,
    pub score: i32,
    pub best_move: Option<Move>,
}

/// Hash-indexed cache of search results, keyed by [`Position::zobrist_hash`].
pub struct TranspositionTable {
    clusters: Box<[Cluster]>,
    mask: u64,
    age: u8,
}

/// Default transposition table size in megabytes, used by the `engine`
/// binary at startup.
pub const DEFAULT_MB: usize = 16;
const BYTES_PER_MB: usize = 1024 * 1024;

impl Default for TranspositionTable {
    /// Creates a table at the engine's default size (see `DEFAULT_MB`).
    fn default() -> Self {
        Self::new(DEFAULT_MB)
    }
}

impl TranspositionTable {
    /// Creates a table sized to roughly `mb` megabytes, rounded down to a
    /// power of two number of clusters. Falls back to a one-cluster table
    /// if `mb` is too small to hold even one, satisfying the "TT allocation
    /// failure falls back to a minimum-size table" policy in the error
    /// handling design rather than failing the process.
    pub fn new(mb: usize) -> Self {
        Self::try_new(mb).0
    }

    /// Like [`new`](Self::new), but also reports an allocation fallback: if
    /// `mb` megabytes of clusters cannot be reserved, the table retries at
    /// half size until it succeeds or bottoms out at a single cluster,
    /// returning a [`SearchError`] describing the fallback instead of
    /// aborting the process (per the resource-failure policy in the error
    /// handling design).
    pub fn try_new(mb: usize) -> (Self, Option<SearchError>) {
        let cluster_bytes = std::mem::size_of::<Cluster>();
        let target = mb.max(1) * BYTES_PER_MB;
        let original_count = floor_power_of_two((target / cluster_bytes).max(1));
        let mut count = original_count;

        loop {
            let mut clusters: Vec<Cluster> = Vec::new();
            if clusters.try_reserve_exact(count).is_ok() {
                clusters.resize(count, Cluster::EMPTY);
                let table = TranspositionTable {
                    clusters: clusters.into_boxed_slice(),
                    mask: (count - 1) as u64,
                    age: 0,
                };
                let error = if count < original_count {
                    let fallback_mb = (count * cluster_bytes).max(1) / BYTES_PER_MB.max(1);
                    tracing::warn!(requested_mb = mb, fallback_mb, "transposition table fell back to a smaller size");
                    Some(SearchError::TranspositionTableFallback {
                        requested_mb: mb,
                        fallback_mb: fallback_mb.max(1),
                    })
                } else {
                    None
                };
                return (table, error);
            }

            if count <= 1 {
                tracing::warn!("transposition table allocation failed even at minimum size; using one cluster");
                return (
                    TranspositionTable {
                        clusters: vec![Cluster::EMPTY].into_boxed_slice(),
                        mask: 0,
                        age: 0,
                    },
                    Some(SearchError::TranspositionTableFallback { requested_mb: mb, fallback_mb: 0 }),
                );
            }
            tracing::debug!(requested_clusters = count, "transposition table allocation failed, retrying at half size");
            count /= 2;
        }
    }

    fn index(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }

    /// Clears all entries and resets the age counter. Called on `ucinewgame`.
    pub fn clear(&mut self) {
        for cluster in self.clusters.iter_mut() {
            *cluster = Cluster::EMPTY;
        }
        self.age = 0;
    }

    /// Bumps the generation counter. Called at the start of every `think()`.
    pub fn new_search(&mut self) {
        self.age = self.age.wrapping_add(1);
        tracing::debug!(generation = self.age, "transposition table generation bumped");
    }

    /// Looks up `hash`, returning an entry whose score has been un-normalized
    /// for `ply` (the current search ply, not the root).
    pub fn probe(&self, hash: u64, ply: i32) -> Option<Probe> {
        let key = truncate(hash);
        let cluster = &self.clusters[self.index(hash)];
        for entry in cluster.entries.iter() {
            if entry.depth >= 0 && entry.key == key {
                return Some(Probe {
                    depth: entry.depth,
                    bound: entry.bound,
                    score: from_tt_score(entry.score, ply),
                    best_move: if entry.best_move == Move::NULL {
                        None
                    } else {
                        Some(entry.best_move)
                    },
                });
            }
        }
        None
    }

    /// Stores a result, normalizing mate scores to distance-from-this-node
    /// before writing. Replacement policy: prefer a same-key slot, then a
    /// stale-age slot, then the shallowest entry in the cluster.
    pub fn store(&mut self, hash: u64, depth: i8, bound: Bound, score: i32, best_move: Option<Move>, ply: i32) {
        let key = truncate(hash);
        let age = self.age;
        let cluster = &mut self.clusters[self.index(hash)];

        let mut victim = 0;
        let mut victim_rank = i32::MAX;
        for (idx, entry) in cluster.entries.iter().enumerate() {
            if entry.depth < 0 || entry.key == key {
                victim = idx;
                break;
            }
            let rank = if entry.age != age {
                -1
            } else {
                entry.depth as i32
            };
            if rank < victim_rank {
                victim_rank = rank;
                victim = idx;
            }
        }

        cluster.entries[victim] = Entry {
            key,
            depth,
            bound,
            score: to_tt_score(score, ply),
            best_move: best_move.unwrap_or(Move::NULL),
            age,
        };
    }

    /// Approximate per-mille fill ratio, for the UCI `hashfull` info field.
    pub fn permille_full(&self) -> u32 {
        let sample = self.clusters.iter().take(250).flat_map(|c| c.entries.iter());
        let mut filled = 0u32;
        let mut total = 0u32;
        for entry in sample {
            total += 1;
            if entry.depth >= 0 && entry.age == self.age {
                filled += 1;
            }
        }
        if total == 0 {
            0
        } else {
            filled * 1000 / total
        }
    }
}

fn truncate(hash: u64) -> u64 {
    hash
}

/// The largest power of two not exceeding `n` (`n >= 1`).
fn floor_power_of_two(n: usize) -> usize {
    1usize << (usize::BITS - 1 - n.leading_zeros())
}

/// Converts a score found at `ply` into one stored relative to the node
/// (distance-to-mate), so the entry is reusable from any ply.
fn to_tt_score(score: i32, ply: i32) -> i32 {
    if score > NEAR_MATE {
        score + ply
    } else if score < -NEAR_MATE {
        score - ply
    } else {
        score
    }
}

/// Inverse of [`to_tt_score`]: converts a stored distance-to-mate score back
/// into one relative to the probing ply.
fn from_tt_score(score: i32, ply: i32) -> i32 {
    if score > NEAR_MATE {
        score - ply
    } else if score < -NEAR_MATE {
        score + ply
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_core::{Square, MoveFlag};

    #[test]
    fn probe_miss_on_empty_table() {
        let tt = TranspositionTable::new(1);
        assert!(tt.probe(0x1234_5678, 0).is_none());
    }

    #[test]
    fn store_then_probe_roundtrip() {
        let mut tt = TranspositionTable::new(1);
        let m = Move::new(Square::E2, Square::E4, MoveFlag::DoublePush);
        tt.store(42, 5, Bound::Exact, 37, Some(m), 2);
        let probe = tt.probe(42, 2).unwrap();
        assert_eq!(probe.score, 37);
        assert_eq!(probe.best_move, Some(m));
        assert_eq!(probe.depth, 5);
    }

    #[test]
    fn mate_score_normalizes_across_ply() {
        let mut tt = TranspositionTable::new(1);
        let mate_score = MATE_SCORE - 3;
        tt.store(7, 2, Bound::Exact, mate_score, None, 5);
        // Probing at a different ply shifts the mate distance accordingly.
        let probe = tt.probe(7, 2).unwrap();
        assert_eq!(probe.score, mate_score - 3);
    }

    #[test]
    fn new_search_bumps_age_and_clear_resets() {
        let mut tt = TranspositionTable::new(1);
        tt.store(1, 1, Bound::Exact, 10, None, 0);
        tt.new_search();
        assert!(tt.probe(1, 0).is_some());
        tt.clear();
        assert!(tt.probe(1, 0).is_none());
    }
}
