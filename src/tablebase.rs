// This file is part of the sixman library.
// Copyright (C) 2026 The sixman authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

use std::cmp::{max, min};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fxhash::FxHashMap;
use shakmaty::{Chess, Move, MoveList, Position, Role};

use crate::errors::{SyzygyError, SyzygyResult};
use crate::filesystem::{find_table_file, split_search_path};
use crate::lazy::Lazy;
use crate::material::Material;
use crate::table::{DtzTable, WdlTable};
use crate::types::{Dtz, Wdl, MAX_PIECES, TBW_EXTENSION, TBZ_EXTENSION};

/// Maximum number of DTZ tables kept open at the same time.
const DTZ_ENTRIES: usize = 64;

fn rotate_role(role: Role) -> Role {
    match role {
        Role::Pawn => Role::Knight,
        Role::Knight => Role::Bishop,
        Role::Bishop => Role::Rook,
        Role::Rook => Role::Queen,
        Role::Queen => Role::King,
        Role::King => Role::Pawn,
    }
}

struct RoleRange {
    from: Role,
    to: Role,
}

impl RoleRange {
    fn excl(from: Role, to: Role) -> RoleRange {
        RoleRange { from, to }
    }

    fn incl(from: Role, to: Role) -> RoleRange {
        RoleRange {
            from,
            to: rotate_role(to),
        }
    }
}

impl Iterator for RoleRange {
    type Item = Role;

    fn next(&mut self) -> Option<Role> {
        if self.from != self.to {
            let from = self.from;
            self.from = rotate_role(from);
            Some(from)
        } else {
            None
        }
    }
}

/// Additional probe information from the alpha-beta search over captures.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ProbeState {
    /// Normal probe.
    Normal,
    /// The best move is zeroing, so the DTZ table need not be consulted.
    ZeroingBestMove,
}

/// A collection of Syzygy tables, lazily opened on first probe.
#[derive(Debug)]
pub struct Tablebase {
    dirs: Vec<PathBuf>,
    wdl: FxHashMap<Material, (PathBuf, Lazy<WdlTable>)>,
    dtz: Mutex<Vec<(Material, Option<Arc<DtzTable>>)>>,
    max_pieces: usize,
}

impl Default for Tablebase {
    fn default() -> Tablebase {
        Tablebase::new()
    }
}

impl Tablebase {
    /// Creates an empty collection of tables with no search directories.
    pub fn new() -> Tablebase {
        Tablebase {
            dirs: Vec::new(),
            wdl: FxHashMap::default(),
            dtz: Mutex::new(Vec::new()),
            max_pieces: 0,
        }
    }

    /// The piece count of the largest WDL table found so far, or 0 if no
    /// tables were found.
    pub fn max_pieces(&self) -> usize {
        self.max_pieces
    }

    /// Reconfigures the search path from a separator-delimited directory
    /// list (`:` on POSIX, `;` on Windows).
    ///
    /// All previously registered tables are dropped, which also releases
    /// their mappings. An empty string or `"<empty>"` disables probing.
    ///
    /// Returns the number of WDL tables found.
    pub fn set_search_path(&mut self, paths: &str) -> usize {
        self.dirs.clear();
        self.wdl.clear();
        self.dtz.get_mut().unwrap().clear();
        self.max_pieces = 0;

        if paths.is_empty() || paths == "<empty>" {
            return 0;
        }

        let mut found = 0;
        for dir in split_search_path(paths) {
            found += self.add_directory(dir);
        }
        found
    }

    /// Registers all tables for the required material signatures that exist
    /// under `path`. The files are not opened until a probe needs them.
    ///
    /// Returns the number of WDL tables found.
    pub fn add_directory<P: AsRef<Path>>(&mut self, path: P) -> usize {
        use Role::*;

        let base = path.as_ref();
        let mut found = 0;

        for a in RoleRange::excl(Pawn, King) {
            found += self.add_both(base, &[King, a], &[King]);

            for b in RoleRange::incl(Pawn, a) {
                found += self.add_both(base, &[King, a, b], &[King]);
                found += self.add_both(base, &[King, a], &[King, b]);

                for c in RoleRange::excl(Pawn, King) {
                    found += self.add_both(base, &[King, a, b], &[King, c]);
                }

                for c in RoleRange::incl(Pawn, b) {
                    found += self.add_both(base, &[King, a, b, c], &[King]);

                    for d in RoleRange::incl(Pawn, c) {
                        found += self.add_both(base, &[King, a, b, c, d], &[King]);
                    }

                    for d in RoleRange::excl(Pawn, King) {
                        found += self.add_both(base, &[King, a, b, c], &[King, d]);
                    }
                }

                for c in RoleRange::incl(Pawn, a) {
                    for d in RoleRange::incl(Pawn, if a == c { b } else { c }) {
                        found += self.add_both(base, &[King, a, b], &[King, c, d]);
                    }
                }
            }
        }

        log::debug!("found {} tables under {}", found, base.display());

        self.dirs.push(base.to_path_buf());

        found
    }

    fn add_both(&mut self, base: &Path, white: &[Role], black: &[Role]) -> usize {
        let material = Material {
            white: white.iter().copied().collect(),
            black: black.iter().copied().collect(),
        };

        if self.wdl.contains_key(&material) {
            return 0;
        }

        let mut path = base.join(material.to_string());
        path.set_extension(TBW_EXTENSION);

        if path.is_file() {
            self.max_pieces = max(self.max_pieces, material.count());
            self.wdl.insert(material, (path, Lazy::new()));
            1
        } else {
            0
        }
    }

    /// Probes tables for the [`Wdl`] value of a position.
    ///
    /// This indicates if the position is winning, lost or drawn with or
    /// without the 50-move rule, assuming the 50-move counter is zero.
    ///
    /// # Errors
    ///
    /// See [`SyzygyError`] for possible error conditions.
    pub fn probe_wdl(&self, pos: &Chess) -> SyzygyResult<Wdl> {
        if pos.board().occupied().count() > MAX_PIECES {
            return Err(SyzygyError::TooManyPieces);
        }
        if pos.castles().any() {
            return Err(SyzygyError::Castling);
        }

        // Probe, resolving captures but ignoring en passant.
        let (mut v, _) = self.probe_ab(pos, Wdl::Loss, Wdl::Win)?;

        // If en passant is not possible we are done.
        let ep_moves = pos.en_passant_moves();
        if ep_moves.is_empty() {
            return Ok(v);
        }

        // Now look at all legal en passant captures.
        let mut v1 = Wdl::Loss;
        for m in ep_moves {
            let mut after = pos.clone();
            after.play_unchecked(&m);

            let (v0_plus, _) = self.probe_ab(&after, Wdl::Loss, Wdl::Win)?;
            let v0 = -v0_plus;

            v1 = max(v0, v1);
        }

        if v1 >= v {
            v = v1;
        } else if v == Wdl::Draw {
            // If there is no legal non-en-passant move, we are forced to
            // play the losing en passant capture.
            let moves = pos.legal_moves();
            if moves.iter().all(|m| m.is_en_passant()) {
                v = v1;
            }
        }

        Ok(v)
    }

    /// Negamax over all legal non-en-passant captures, probing the WDL
    /// table at the horizon.
    fn probe_ab(&self, pos: &Chess, mut alpha: Wdl, beta: Wdl) -> SyzygyResult<(Wdl, ProbeState)> {
        let mut captures = pos.capture_moves();
        captures.retain(|m| !m.is_en_passant());

        for m in captures {
            let mut after = pos.clone();
            after.play_unchecked(&m);

            let (v_plus, _) = self.probe_ab(&after, -beta, -alpha)?;
            let v = -v_plus;

            if v > alpha {
                if v >= beta {
                    return Ok((v, ProbeState::ZeroingBestMove));
                }
                alpha = v;
            }
        }

        let v = self.probe_wdl_table(pos)?;

        if alpha >= v {
            Ok((
                alpha,
                if alpha > Wdl::Draw {
                    ProbeState::ZeroingBestMove
                } else {
                    ProbeState::Normal
                },
            ))
        } else {
            Ok((v, ProbeState::Normal))
        }
    }

    fn probe_wdl_table(&self, pos: &Chess) -> SyzygyResult<Wdl> {
        // Test for KvK.
        if pos.board().kings() == pos.board().occupied() {
            return Ok(Wdl::Draw);
        }

        let key = Material::from_board(pos.board());

        if let Some((path, table)) = self.wdl.get(&key).or_else(|| self.wdl.get(&key.flipped())) {
            let table = table.get_or_try_init(|| WdlTable::open(path, &key))?;
            table.probe_wdl_table(pos)
        } else {
            Err(SyzygyError::MissingTable {
                material: key.normalized(),
            })
        }
    }

    /// Probes tables for the [`Dtz`] value of a position.
    ///
    /// Min-maxing the DTZ of the available moves guarantees achieving the
    /// optimal outcome under the 50-move rule.
    ///
    /// # Errors
    ///
    /// See [`SyzygyError`] for possible error conditions.
    pub fn probe_dtz(&self, pos: &Chess) -> SyzygyResult<Dtz> {
        if pos.board().occupied().count() > MAX_PIECES {
            return Err(SyzygyError::TooManyPieces);
        }
        if pos.castles().any() {
            return Err(SyzygyError::Castling);
        }

        let mut v = self.probe_dtz_no_ep(pos)?;

        let ep_moves = pos.en_passant_moves();
        if ep_moves.is_empty() {
            return Ok(v);
        }

        // Now handle en passant.
        let mut wdl = Wdl::Loss;
        for m in ep_moves {
            let mut after = pos.clone();
            after.play_unchecked(&m);

            let (v0_plus, _) = self.probe_ab(&after, Wdl::Loss, Wdl::Win)?;
            let v0 = -v0_plus;

            wdl = max(v0, wdl);
        }

        let v1 = Dtz::before_zeroing(wdl);

        if v < Dtz(-100) {
            if v1 >= Dtz(0) {
                v = v1;
            }
        } else if v < Dtz(0) {
            if v1 >= Dtz(0) || v1 < Dtz(-100) {
                v = v1;
            }
        } else if v > Dtz(100) {
            if v1 > Dtz(0) {
                v = v1;
            }
        } else if v > Dtz(0) {
            if v1 == Dtz(1) {
                v = v1;
            }
        } else if v1 >= Dtz(0) {
            v = v1;
        } else {
            // If there is no legal non-en-passant move, we are forced to
            // play the losing en passant capture.
            let moves = pos.legal_moves();
            if moves.iter().all(|m| m.is_en_passant()) {
                v = v1;
            }
        }

        Ok(v)
    }

    /// This routine treats a position with en passant captures as one
    /// without.
    fn probe_dtz_no_ep(&self, pos: &Chess) -> SyzygyResult<Dtz> {
        let (wdl, state) = self.probe_ab(pos, Wdl::Loss, Wdl::Win)?;

        if wdl == Wdl::Draw {
            return Ok(Dtz(0));
        }

        if state == ProbeState::ZeroingBestMove {
            return Ok(Dtz::before_zeroing(wdl));
        }

        if wdl > Wdl::Draw {
            // The winning side wants to zero the 50-move counter as early
            // as possible. A non-capturing pawn move that preserves the
            // value does so immediately.
            let mut moves = pos.legal_moves();
            moves.retain(|m| m.role() == Role::Pawn && !m.is_capture());

            let beta = if wdl == Wdl::Win {
                Wdl::BlessedLoss
            } else {
                Wdl::Draw
            };

            for m in moves {
                let mut after = pos.clone();
                after.play_unchecked(&m);

                let (v_plus, _) = self.probe_ab(&after, Wdl::Loss, beta)?;
                let v = -v_plus;

                if v == wdl {
                    return Ok(Dtz::before_zeroing(v));
                }
            }
        }

        if let Some(Dtz(plies)) = self.probe_dtz_table(pos, wdl)? {
            return Ok(Dtz::before_zeroing(wdl).add_plies(plies));
        }

        // The DTZ table stores only the other side to move, so resolve the
        // probe by a 1-ply search.
        if wdl > Wdl::Draw {
            let mut best = None;

            let mut moves = pos.legal_moves();
            moves.retain(|m| !m.is_zeroing());

            for m in moves {
                let mut after = pos.clone();
                after.play_unchecked(&m);

                let v = -self.probe_dtz(&after)?;

                if v == Dtz(1) && after.is_checkmate() {
                    best = Some(Dtz(1));
                } else if v > Dtz(0) && best.map_or(true, |best| v + Dtz(1) < best) {
                    best = Some(v + Dtz(1));
                }
            }

            Ok(u!(best))
        } else {
            let mut best = Dtz(-1);

            for m in pos.legal_moves() {
                let mut after = pos.clone();
                after.play_unchecked(&m);

                let v = if m.is_zeroing() {
                    if wdl == Wdl::Loss {
                        Dtz(-1)
                    } else {
                        // A zeroing move that does not even hold the
                        // blessed loss is no better than the alternatives.
                        let (v, _) = self.probe_ab(&after, Wdl::CursedWin, Wdl::Win)?;
                        Dtz(if v == Wdl::Win { 0 } else { -101 })
                    }
                } else {
                    -self.probe_dtz(&after)? - Dtz(1)
                };

                best = min(v, best);
            }

            Ok(best)
        }
    }

    fn probe_dtz_table(&self, pos: &Chess, wdl: Wdl) -> SyzygyResult<Option<Dtz>> {
        let key = Material::from_board(pos.board());

        let table = {
            let mut entries = self.dtz.lock().unwrap();

            match entries
                .iter()
                .position(|(material, _)| *material == key || *material == key.flipped())
            {
                Some(i) => {
                    // Move the entry to the front of the most recently
                    // used list.
                    let entry = entries.remove(i);
                    entries.insert(0, entry);
                    entries[0].1.clone()
                }
                None => {
                    let material = key.normalized();
                    let name = format!("{}.{}", material, TBZ_EXTENSION);

                    let table = match find_table_file(&self.dirs, &name) {
                        Some(path) => match DtzTable::open(&path, &material) {
                            Ok(table) => Some(Arc::new(table)),
                            Err(err) => {
                                // Record the failure so the open is never
                                // retried.
                                entries.insert(0, (material, None));
                                entries.truncate(DTZ_ENTRIES);
                                return Err(err);
                            }
                        },
                        None => None,
                    };

                    entries.insert(0, (material, table));
                    entries.truncate(DTZ_ENTRIES);
                    entries[0].1.clone()
                }
            }
        };

        match table {
            Some(table) => table.probe_dtz_table(pos, wdl),
            None => Err(SyzygyError::MissingTable {
                material: key.normalized(),
            }),
        }
    }

    /// Evaluates a single root move for [`Tablebase::root_probe`]:
    /// checkmate counts as an immediate win, zeroing moves are translated
    /// from the WDL tables, and everything else is the negated DTZ of the
    /// reached position, stepped away from zero.
    fn probe_move_dtz(&self, pos: &Chess, m: Move, root_winning: bool) -> SyzygyResult<i32> {
        let mut after = pos.clone();
        after.play_unchecked(&m);

        if root_winning && after.is_checkmate() {
            return Ok(1);
        }

        Ok(if after.halfmoves() != 0 {
            let v = i32::from(-self.probe_dtz(&after)?);
            match v {
                v if v > 0 => v + 1,
                v if v < 0 => v - 1,
                v => v,
            }
        } else {
            let v = -self.probe_wdl(&after)?;
            i32::from(Dtz::before_zeroing(v))
        })
    }

    /// Uses the DTZ tables to filter a list of root moves down to those
    /// that preserve the optimal outcome under the 50-move rule. If the
    /// position is lost, only the most resilient moves are kept.
    ///
    /// `has_repeated` reports whether the position has repeated since the
    /// last zeroing move. Without a repetition, a winning side may keep
    /// every move that stays safely within the 50-move budget.
    ///
    /// Returns the WDL evaluation of the root position, taking the current
    /// 50-move counter into account. On error the move list is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// See [`SyzygyError`] for possible error conditions.
    pub fn root_probe(
        &self,
        pos: &Chess,
        moves: &mut MoveList,
        has_repeated: bool,
    ) -> SyzygyResult<Wdl> {
        let dtz = i32::from(self.probe_dtz(pos)?);
        let cnt50 = pos.halfmoves() as i32;

        // Probe each move.
        let mut scores = Vec::with_capacity(moves.len());
        for m in moves.iter() {
            scores.push(self.probe_move_dtz(pos, m.clone(), dtz > 0)?);
        }

        // Use the 50-move counter to determine whether the root position
        // is won, lost or drawn.
        let wdl = if dtz > 0 {
            if dtz + cnt50 <= 100 {
                Wdl::Win
            } else {
                Wdl::CursedWin
            }
        } else if dtz < 0 {
            if -dtz + cnt50 <= 100 {
                Wdl::Loss
            } else {
                Wdl::BlessedLoss
            }
        } else {
            Wdl::Draw
        };

        if dtz > 0 {
            // Winning, or drawn under the 50-move rule.
            let best = scores
                .iter()
                .copied()
                .filter(|&v| v > 0)
                .min()
                .unwrap_or(i32::MAX);

            // If the current phase has not seen a repetition, any move
            // that stays safely within the 50-move budget will do.
            let acceptable = if !has_repeated && best + cnt50 <= 99 {
                99 - cnt50
            } else {
                best
            };

            retain_scored(moves, &scores, |v| v > 0 && v <= acceptable);
        } else if dtz < 0 {
            // Losing, or drawn under the 50-move rule.
            let best = scores.iter().copied().min().unwrap_or(0);

            // Resist as long as possible, unless there is enough room to
            // try every move.
            if -best * 2 + cnt50 >= 100 {
                retain_scored(moves, &scores, |v| v == best);
            }
        } else {
            // Drawing: keep the moves that preserve the draw.
            retain_scored(moves, &scores, |v| v == 0);
        }

        Ok(wdl)
    }

    /// Uses the WDL tables to filter a list of root moves down to those
    /// that preserve the outcome. This is a fallback for the case that
    /// some or all DTZ tables are missing.
    ///
    /// Returns the WDL evaluation of the root position. On error the move
    /// list is left untouched.
    ///
    /// # Errors
    ///
    /// See [`SyzygyError`] for possible error conditions.
    pub fn root_probe_wdl(&self, pos: &Chess, moves: &mut MoveList) -> SyzygyResult<Wdl> {
        let wdl = self.probe_wdl(pos)?;

        let mut scores = Vec::with_capacity(moves.len());
        let mut best = Wdl::Loss;

        for m in moves.iter() {
            let mut after = pos.clone();
            after.play_unchecked(m);

            let v = -self.probe_wdl(&after)?;
            best = max(v, best);
            scores.push(i32::from(v));
        }

        retain_scored(moves, &scores, |v| v == i32::from(best));

        Ok(wdl)
    }

    /// Selects a DTZ-optimal move: the fastest win, else a move that holds
    /// the draw, else the most resilient defense. Returns `None` if there
    /// is no legal move.
    ///
    /// # Errors
    ///
    /// See [`SyzygyError`] for possible error conditions.
    pub fn best_move(&self, pos: &Chess) -> SyzygyResult<Option<(Move, Dtz)>> {
        fn category(v: i32) -> u8 {
            match v {
                v if v > 0 => 2,
                0 => 1,
                _ => 0,
            }
        }

        let mut best: Option<(Move, i32)> = None;

        for m in pos.legal_moves() {
            let v = self.probe_move_dtz(pos, m.clone(), true)?;

            let better = match best {
                None => true,
                Some((_, w)) => {
                    category(v) > category(w) || (category(v) == category(w) && v < w)
                }
            };

            if better {
                best = Some((m, v));
            }
        }

        Ok(best.map(|(m, v)| (m, Dtz(v))))
    }
}

/// Retains the moves whose parallel score satisfies the predicate.
fn retain_scored<F>(moves: &mut MoveList, scores: &[i32], predicate: F)
where
    F: Fn(i32) -> bool,
{
    let mut i = 0;
    moves.retain(|_| {
        let keep = predicate(scores[i]);
        i += 1;
        keep
    });
}

#[cfg(test)]
mod tests {
    use shakmaty::fen::Fen;
    use shakmaty::CastlingMode;

    use super::*;

    fn setup(fen: &str) -> Chess {
        fen.parse::<Fen>()
            .expect("valid fen")
            .into_position(CastlingMode::Standard)
            .expect("legal position")
    }

    #[test]
    fn test_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Tablebase>();
        assert_sync::<Tablebase>();
    }

    #[test]
    fn test_kvk_without_any_tables() {
        let tables = Tablebase::new();
        let pos = setup("8/8/8/8/8/8/8/K6k w - - 0 1");

        assert_eq!(tables.probe_wdl(&pos).expect("probe wdl"), Wdl::Draw);
        assert_eq!(tables.probe_dtz(&pos).expect("probe dtz"), Dtz(0));
    }

    #[test]
    fn test_missing_table() {
        let tables = Tablebase::new();
        let pos = setup("4k3/8/8/8/8/8/8/Q3K3 w - - 0 1");

        assert!(matches!(
            tables.probe_wdl(&pos),
            Err(SyzygyError::MissingTable { ref material }) if material.to_string() == "KQvK"
        ));
    }

    #[test]
    fn test_too_many_pieces() {
        let tables = Tablebase::new();

        assert!(matches!(
            tables.probe_wdl(&Chess::default()),
            Err(SyzygyError::TooManyPieces)
        ));
    }

    #[test]
    fn test_castling_rights() {
        let tables = Tablebase::new();
        let pos = setup("4k3/8/8/8/8/8/8/4K2R w K - 0 1");

        assert!(matches!(tables.probe_wdl(&pos), Err(SyzygyError::Castling)));
        assert!(matches!(tables.probe_dtz(&pos), Err(SyzygyError::Castling)));
    }

    #[test]
    fn test_empty_search_path_disables_probing() {
        let mut tables = Tablebase::new();
        assert_eq!(tables.set_search_path(""), 0);
        assert_eq!(tables.set_search_path("<empty>"), 0);
        assert_eq!(tables.max_pieces(), 0);
    }
}
