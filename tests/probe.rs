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

//! End-to-end probes against fabricated table files.
//!
//! Real table files are too large to ship with the test suite, but the
//! format has an escape hatch this suite leans on: a subtable whose values
//! are all equal is stored as a two byte single-value header. A complete
//! table file for such an endgame is a handful of bytes, which is enough
//! to exercise the whole stack from the file mapper down to the probe
//! drivers.

use std::fs;
use std::path::Path;

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Position};
use sixman::{Dtz, SyzygyError, Tablebase, Wdl};

const WDL_MAGIC: [u8; 4] = [0x71, 0xe8, 0x23, 0x5d];
const DTZ_MAGIC: [u8; 4] = [0xd7, 0x66, 0x0c, 0xa5];

fn setup(fen: &str) -> Chess {
    fen.parse::<Fen>()
        .expect("valid fen")
        .into_position(CastlingMode::Standard)
        .expect("legal position")
}

/// Builds a pawnless 3-piece WDL file with single-valued subtables for
/// both sides to move.
///
/// Each piece byte carries the piece for the white-to-move subtable in the
/// low nibble and for the black-to-move subtable in the high nibble.
fn single_value_wdl(pieces: [u8; 3], white_value: u8, black_value: u8) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&WDL_MAGIC);
    data.push(0x01); // split, no pawns
    data.push(0x00); // order nibbles for both sides
    data.extend(pieces.iter().map(|p| p | (p << 4)));
    data.push(0x00); // padding to an even offset
    data.extend_from_slice(&[0x80, white_value]);
    data.extend_from_slice(&[0x80, black_value]);
    data
}

/// Builds the matching single-valued DTZ file. The stored distance for a
/// single-valued DTZ subtable is always zero.
fn single_value_dtz(pieces: [u8; 3]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&DTZ_MAGIC);
    data.push(0x01); // split, no pawns
    data.push(0x00); // order nibbles
    data.extend(pieces.iter().map(|p| p | (p << 4)));
    data.push(0x00); // padding to an even offset
    data.extend_from_slice(&[0x80, 0x00]);
    data
}

const WHITE_KING: u8 = 6;
const WHITE_QUEEN: u8 = 5;
const WHITE_KNIGHT: u8 = 2;
const BLACK_KING: u8 = 8 | 6;

fn write_knvk(dir: &Path) {
    // KNvK is drawn for either side to move.
    fs::write(
        dir.join("KNvK.rtbw"),
        single_value_wdl([WHITE_KING, WHITE_KNIGHT, BLACK_KING], 2, 2),
    )
    .expect("write KNvK.rtbw");
}

fn write_kqvk(dir: &Path) {
    // A stylized KQvK: won with White to move, lost with Black to move.
    // Real KQvK tables are not single-valued (stalemate corners exist),
    // but the fixture keeps the full probe pipeline honest.
    fs::write(
        dir.join("KQvK.rtbw"),
        single_value_wdl([WHITE_KING, WHITE_QUEEN, BLACK_KING], 4, 0),
    )
    .expect("write KQvK.rtbw");
    fs::write(
        dir.join("KQvK.rtbz"),
        single_value_dtz([WHITE_KING, WHITE_QUEEN, BLACK_KING]),
    )
    .expect("write KQvK.rtbz");
}

#[test]
fn test_add_directory_registers_tables() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_knvk(dir.path());
    write_kqvk(dir.path());

    let mut tables = Tablebase::new();
    assert_eq!(tables.add_directory(dir.path()), 2);
    assert_eq!(tables.max_pieces(), 3);
}

#[test]
fn test_search_path_spans_directories() {
    let first = tempfile::tempdir().expect("tempdir");
    let second = tempfile::tempdir().expect("tempdir");
    write_knvk(first.path());
    write_kqvk(second.path());

    let paths = format!(
        "{}{}{}",
        first.path().display(),
        if cfg!(windows) { ';' } else { ':' },
        second.path().display()
    );

    let mut tables = Tablebase::new();
    assert_eq!(tables.set_search_path(&paths), 2);
    assert_eq!(tables.max_pieces(), 3);

    let pos = setup("8/8/8/8/8/8/8/KN5k w - - 0 1");
    assert_eq!(tables.probe_wdl(&pos).expect("probe wdl"), Wdl::Draw);

    // Reconfiguring drops everything.
    assert_eq!(tables.set_search_path(""), 0);
    assert!(matches!(
        tables.probe_wdl(&pos),
        Err(SyzygyError::MissingTable { .. })
    ));
}

#[test]
fn test_knvk_is_drawn_for_both_sides() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_knvk(dir.path());

    let mut tables = Tablebase::new();
    tables.add_directory(dir.path());

    let wtm = setup("8/8/8/8/8/8/8/KN5k w - - 0 1");
    assert_eq!(tables.probe_wdl(&wtm).expect("probe wdl"), Wdl::Draw);
    assert_eq!(tables.probe_dtz(&wtm).expect("probe dtz"), Dtz(0));

    let btm = setup("8/8/8/8/8/8/8/KN5k b - - 0 1");
    assert_eq!(tables.probe_wdl(&btm).expect("probe wdl"), Wdl::Draw);
    assert_eq!(tables.probe_dtz(&btm).expect("probe dtz"), Dtz(0));
}

#[test]
fn test_kqvk_wdl_and_dtz() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_kqvk(dir.path());

    let mut tables = Tablebase::new();
    tables.add_directory(dir.path());

    let wtm = setup("4k3/8/8/8/8/8/8/QK6 w - - 0 1");
    assert_eq!(tables.probe_wdl(&wtm).expect("probe wdl"), Wdl::Win);
    assert_eq!(tables.probe_dtz(&wtm).expect("probe dtz"), Dtz(1));
}

#[test]
fn test_kqvk_wrong_stm_falls_back_to_search() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_kqvk(dir.path());

    let mut tables = Tablebase::new();
    tables.add_directory(dir.path());

    // The DTZ table stores only the white-to-move side, so this probe is
    // resolved by searching one ply ahead.
    let btm = setup("4k3/8/8/8/8/8/8/QK6 b - - 0 1");
    assert_eq!(tables.probe_wdl(&btm).expect("probe wdl"), Wdl::Loss);
    assert_eq!(tables.probe_dtz(&btm).expect("probe dtz"), Dtz(-2));
}

#[test]
fn test_root_probe_retains_winning_moves() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_kqvk(dir.path());

    let mut tables = Tablebase::new();
    tables.add_directory(dir.path());

    let pos = setup("4k3/8/8/8/8/8/8/QK6 w - - 0 1");
    let mut moves = pos.legal_moves();
    let num_moves = moves.len();

    let wdl = tables
        .root_probe(&pos, &mut moves, false)
        .expect("root probe");

    // Every move keeps the fixture's win well within the 50-move budget.
    assert_eq!(wdl, Wdl::Win);
    assert_eq!(moves.len(), num_moves);
}

#[test]
fn test_root_probe_wdl_retains_best_moves() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_kqvk(dir.path());

    let mut tables = Tablebase::new();
    tables.add_directory(dir.path());

    let pos = setup("4k3/8/8/8/8/8/8/QK6 w - - 0 1");
    let mut moves = pos.legal_moves();
    let num_moves = moves.len();

    let wdl = tables
        .root_probe_wdl(&pos, &mut moves)
        .expect("root probe wdl");

    assert_eq!(wdl, Wdl::Win);
    assert_eq!(moves.len(), num_moves);
}

#[test]
fn test_best_move_prefers_wins() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_kqvk(dir.path());

    let mut tables = Tablebase::new();
    tables.add_directory(dir.path());

    let pos = setup("4k3/8/8/8/8/8/8/QK6 w - - 0 1");
    let (_, dtz) = tables
        .best_move(&pos)
        .expect("probe")
        .expect("has legal moves");
    assert!(dtz > Dtz(0));
}

#[test]
fn test_invalid_magic() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut data = single_value_wdl([WHITE_KING, WHITE_QUEEN, BLACK_KING], 4, 0);
    data[0] ^= 0xff;
    fs::write(dir.path().join("KQvK.rtbw"), data).expect("write KQvK.rtbw");

    let mut tables = Tablebase::new();
    assert_eq!(tables.add_directory(dir.path()), 1);

    let pos = setup("4k3/8/8/8/8/8/8/QK6 w - - 0 1");
    assert!(matches!(tables.probe_wdl(&pos), Err(SyzygyError::Magic)));
}

#[test]
fn test_truncated_table_is_reported_as_corrupted() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut data = single_value_wdl([WHITE_KING, WHITE_QUEEN, BLACK_KING], 4, 0);
    data.truncate(8);
    fs::write(dir.path().join("KQvK.rtbw"), data).expect("write KQvK.rtbw");

    let mut tables = Tablebase::new();
    assert_eq!(tables.add_directory(dir.path()), 1);

    let pos = setup("4k3/8/8/8/8/8/8/QK6 w - - 0 1");
    assert!(matches!(
        tables.probe_wdl(&pos),
        Err(SyzygyError::CorruptedTable { .. })
    ));
}
