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

use std::marker::PhantomData;
use std::path::Path;

use arrayvec::ArrayVec;
use bit_vec::BitVec;
use bitflags::bitflags;
use itertools::Itertools;
use lazy_static::lazy_static;
use num_integer::binomial;
use shakmaty::{Bitboard, Chess, Color, File, Piece, Position, Rank, Role, Square};

use crate::errors::SyzygyResult;
use crate::filesystem::Mapping;
use crate::material::Material;
use crate::types::{Pieces, Wdl, Dtz, DTZ_MAGIC, MAX_PIECES, WDL_MAGIC};

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Metric {
    Wdl,
    Dtz,
}

pub(crate) trait TableTag {
    const METRIC: Metric;
}

#[derive(Debug)]
pub(crate) enum WdlTag {}

impl TableTag for WdlTag {
    const METRIC: Metric = Metric::Wdl;
}

#[derive(Debug)]
pub(crate) enum DtzTag {}

impl TableTag for DtzTag {
    const METRIC: Metric = Metric::Dtz;
}

pub(crate) type WdlTable = Table<WdlTag>;
pub(crate) type DtzTable = Table<DtzTag>;

bitflags! {
    /// Table layout flags.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    struct Layout: u8 {
        const SPLIT = 1;
        const HAS_PAWNS = 2;
    }
}

bitflags! {
    /// Subtable flags.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    struct Flag: u8 {
        const STM = 1;
        const MAPPED = 2;
        const WIN_PLIES = 4;
        const LOSS_PLIES = 8;
        const SINGLE_VALUE = 128;
    }
}

/// Maps squares into the a1-d1-d4 triangle.
const TRIANGLE: [u64; 64] = [
    6, 0, 1, 2, 2, 1, 0, 6,
    0, 7, 3, 4, 4, 3, 7, 0,
    1, 3, 8, 5, 5, 8, 3, 1,
    2, 4, 5, 9, 9, 5, 4, 2,
    2, 4, 5, 9, 9, 5, 4, 2,
    1, 3, 8, 5, 5, 8, 3, 1,
    0, 7, 3, 4, 4, 3, 7, 0,
    6, 0, 1, 2, 2, 1, 0, 6,
];

/// Maps the b1-h1-h7 triangle to `0..=27`.
const LOWER: [u64; 64] = [
    28,  0,  1,  2,  3,  4,  5,  6,
     0, 29,  7,  8,  9, 10, 11, 12,
     1,  7, 30, 13, 14, 15, 16, 17,
     2,  8, 13, 31, 18, 19, 20, 21,
     3,  9, 14, 18, 32, 22, 23, 24,
     4, 10, 15, 19, 22, 33, 25, 26,
     5, 11, 16, 20, 23, 25, 34, 27,
     6, 12, 17, 21, 24, 26, 27, 35,
];

/// Unused entry.
const Z0: u64 = 0;

/// Encoding of all 461 configurations of two non-adjacent kings, where the
/// first king is confined to the a1-d1-d4 triangle.
const KK_IDX: [[u64; 64]; 10] = [[
     Z0,  Z0,  Z0,   0,   1,   2,   3,   4,
     Z0,  Z0,  Z0,   5,   6,   7,   8,   9,
     10,  11,  12,  13,  14,  15,  16,  17,
     18,  19,  20,  21,  22,  23,  24,  25,
     26,  27,  28,  29,  30,  31,  32,  33,
     34,  35,  36,  37,  38,  39,  40,  41,
     42,  43,  44,  45,  46,  47,  48,  49,
     50,  51,  52,  53,  54,  55,  56,  57,
], [
     58,  Z0,  Z0,  Z0,  59,  60,  61,  62,
     63,  Z0,  Z0,  Z0,  64,  65,  66,  67,
     68,  69,  70,  71,  72,  73,  74,  75,
     76,  77,  78,  79,  80,  81,  82,  83,
     84,  85,  86,  87,  88,  89,  90,  91,
     92,  93,  94,  95,  96,  97,  98,  99,
    100, 101, 102, 103, 104, 105, 106, 107,
    108, 109, 110, 111, 112, 113, 114, 115,
], [
    116, 117,  Z0,  Z0,  Z0, 118, 119, 120,
    121, 122,  Z0,  Z0,  Z0, 123, 124, 125,
    126, 127, 128, 129, 130, 131, 132, 133,
    134, 135, 136, 137, 138, 139, 140, 141,
    142, 143, 144, 145, 146, 147, 148, 149,
    150, 151, 152, 153, 154, 155, 156, 157,
    158, 159, 160, 161, 162, 163, 164, 165,
    166, 167, 168, 169, 170, 171, 172, 173,
], [
    174,  Z0,  Z0,  Z0, 175, 176, 177, 178,
    179,  Z0,  Z0,  Z0, 180, 181, 182, 183,
    184,  Z0,  Z0,  Z0, 185, 186, 187, 188,
    189, 190, 191, 192, 193, 194, 195, 196,
    197, 198, 199, 200, 201, 202, 203, 204,
    205, 206, 207, 208, 209, 210, 211, 212,
    213, 214, 215, 216, 217, 218, 219, 220,
    221, 222, 223, 224, 225, 226, 227, 228,
], [
    229, 230,  Z0,  Z0,  Z0, 231, 232, 233,
    234, 235,  Z0,  Z0,  Z0, 236, 237, 238,
    239, 240,  Z0,  Z0,  Z0, 241, 242, 243,
    244, 245, 246, 247, 248, 249, 250, 251,
    252, 253, 254, 255, 256, 257, 258, 259,
    260, 261, 262, 263, 264, 265, 266, 267,
    268, 269, 270, 271, 272, 273, 274, 275,
    276, 277, 278, 279, 280, 281, 282, 283,
], [
    284, 285, 286, 287, 288, 289, 290, 291,
    292, 293,  Z0,  Z0,  Z0, 294, 295, 296,
    297, 298,  Z0,  Z0,  Z0, 299, 300, 301,
    302, 303,  Z0,  Z0,  Z0, 304, 305, 306,
    307, 308, 309, 310, 311, 312, 313, 314,
    315, 316, 317, 318, 319, 320, 321, 322,
    323, 324, 325, 326, 327, 328, 329, 330,
    331, 332, 333, 334, 335, 336, 337, 338,
], [
     Z0,  Z0, 339, 340, 341, 342, 343, 344,
     Z0,  Z0, 345, 346, 347, 348, 349, 350,
     Z0,  Z0, 441, 351, 352, 353, 354, 355,
     Z0,  Z0,  Z0, 442, 356, 357, 358, 359,
     Z0,  Z0,  Z0,  Z0, 443, 360, 361, 362,
     Z0,  Z0,  Z0,  Z0,  Z0, 444, 363, 364,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 445, 365,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 446,
], [
     Z0,  Z0,  Z0, 366, 367, 368, 369, 370,
     Z0,  Z0,  Z0, 371, 372, 373, 374, 375,
     Z0,  Z0,  Z0, 376, 377, 378, 379, 380,
     Z0,  Z0,  Z0, 447, 381, 382, 383, 384,
     Z0,  Z0,  Z0,  Z0, 448, 385, 386, 387,
     Z0,  Z0,  Z0,  Z0,  Z0, 449, 388, 389,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 450, 390,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 451,
], [
    452, 391, 392, 393, 394, 395, 396, 397,
     Z0,  Z0,  Z0,  Z0, 398, 399, 400, 401,
     Z0,  Z0,  Z0,  Z0, 402, 403, 404, 405,
     Z0,  Z0,  Z0,  Z0, 406, 407, 408, 409,
     Z0,  Z0,  Z0,  Z0, 453, 410, 411, 412,
     Z0,  Z0,  Z0,  Z0,  Z0, 454, 413, 414,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 455, 415,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 456,
], [
    457, 416, 417, 418, 419, 420, 421, 422,
     Z0, 458, 423, 424, 425, 426, 427, 428,
     Z0,  Z0,  Z0,  Z0,  Z0, 429, 430, 431,
     Z0,  Z0,  Z0,  Z0,  Z0, 432, 433, 434,
     Z0,  Z0,  Z0,  Z0,  Z0, 435, 436, 437,
     Z0,  Z0,  Z0,  Z0,  Z0, 459, 438, 439,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 460, 440,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 461,
]];

lazy_static! {
    static ref CONSTS: Consts = Consts::new();
}

/// Derived tables for the pawn encodings, computed once per process.
struct Consts {
    map_pawns: [u64; 64],
    lead_pawn_idx: [[u64; 64]; 5],
    lead_pawns_size: [[u64; 4]; 5],
}

impl Consts {
    fn new() -> Consts {
        let mut available_squares: u64 = 48;

        let mut map_pawns = [0; 64];
        let mut lead_pawn_idx = [[0; 64]; 5];
        let mut lead_pawns_size = [[0; 4]; 5];

        for lead_pawns_cnt in 1..=4usize {
            for file in 0..4usize {
                let mut idx = 0;

                for rank in 1..7 {
                    let sq = Square::from_coords(File::new(file as u32), Rank::new(rank));
                    if lead_pawns_cnt == 1 {
                        available_squares -= 1;
                        map_pawns[sq as usize] = available_squares;
                        available_squares -= 1;
                        map_pawns[sq.flip_horizontal() as usize] = available_squares;
                    }
                    lead_pawn_idx[lead_pawns_cnt][sq as usize] = idx;
                    idx += binomial(map_pawns[sq as usize], lead_pawns_cnt as u64 - 1);
                }

                lead_pawns_size[lead_pawns_cnt][file] = idx;
            }
        }

        Consts {
            map_pawns,
            lead_pawn_idx,
            lead_pawns_size,
        }
    }
}

/// Header byte to piece.
fn byte_to_piece(p: u8) -> Option<Piece> {
    let color = Color::from_white(p & 8 == 0);
    Some(match p & !8 {
        1 => Role::Pawn.of(color),
        2 => Role::Knight.of(color),
        3 => Role::Bishop.of(color),
        4 => Role::Rook.of(color),
        5 => Role::Queen.of(color),
        6 => Role::King.of(color),
        _ => return None,
    })
}

/// Checks if a square is not on the a1-h8 diagonal.
fn offdiag(sq: Square) -> bool {
    sq.file() as u32 != sq.rank() as u32
}

/// Parse a piece list from the table header.
fn parse_pieces(
    mapping: &Mapping,
    ptr: u64,
    count: usize,
    side: Color,
) -> SyzygyResult<Pieces> {
    let mut pieces = Pieces::new();

    for i in 0..count {
        let p = mapping.read_u8(ptr + i as u64)?;
        pieces.push(u!(byte_to_piece(side.fold_wb(p & 0xf, p >> 4))));
    }

    Ok(pieces)
}

/// Group pieces that will be encoded together.
fn group_pieces(pieces: &Pieces) -> ArrayVec<usize, MAX_PIECES> {
    let mut result = ArrayVec::new();
    let material = Material::from_iter(pieces.iter().copied());

    // For pawnless tables the leading group is formed by three unique
    // pieces, or else by the two kings.
    let first_len = if material.has_pawns() {
        0
    } else if material.unique_pieces() >= 3 {
        3
    } else {
        2
    };

    if first_len > 0 {
        result.push(first_len);
    }

    // The remaining identical pieces are grouped together.
    let chunks = pieces.iter().skip(first_len).chunk_by(|p| **p);
    for (_, chunk) in &chunks {
        result.push(chunk.count());
    }

    result
}

/// Description of the encoding used for a piece configuration.
#[derive(Debug, Clone)]
struct GroupData {
    pieces: Pieces,
    lens: ArrayVec<usize, MAX_PIECES>,
    factors: ArrayVec<u64, { MAX_PIECES + 1 }>,
}

impl GroupData {
    fn new(pieces: Pieces, order: &[u8; 2], file: usize) -> SyzygyResult<GroupData> {
        ensure!(pieces.len() >= 2);

        let material = Material::from_iter(pieces.iter().copied());

        // Compute group lengths.
        let lens = group_pieces(&pieces);

        // Compute a mixed-radix factor for each group. The order nibbles
        // decide at which position the leading group and the trailing pawns
        // are consumed.
        let pp = material.white.has_pawns() && material.black.has_pawns();
        let mut factors = ArrayVec::from([0; MAX_PIECES + 1]);
        factors.truncate(lens.len() + 1);
        let mut free_squares = 64 - lens[0] as u64 - if pp { lens[1] as u64 } else { 0 };
        let mut next = if pp { 2 } else { 1 };
        let mut idx = 1;
        let mut k = 0;

        while next < lens.len() || k == order[0] || k == order[1] {
            // A corrupted order nibble must not keep this loop alive.
            ensure!(k < 16);

            if k == order[0] {
                // Leading pawns or pieces.
                factors[0] = idx;

                idx *= if material.has_pawns() {
                    CONSTS.lead_pawns_size[lens[0]][file]
                } else if material.unique_pieces() >= 3 {
                    31_332
                } else {
                    462
                };
            } else if k == order[1] {
                // Remaining pawns.
                factors[1] = idx;
                idx *= binomial(48 - lens[0] as u64, *u!(lens.get(1)) as u64);
            } else {
                // Remaining pieces.
                factors[next] = idx;
                idx *= binomial(free_squares, lens[next] as u64);
                free_squares -= lens[next] as u64;
                next += 1;
            }

            k += 1;
        }

        factors[lens.len()] = idx;

        Ok(GroupData {
            pieces,
            lens,
            factors,
        })
    }
}

/// Indexes into the DTZ value map, one offset per WDL band.
#[derive(Debug)]
struct DtzMap {
    ptr: u64,
    idx: [u16; 4],
}

impl DtzMap {
    fn new(ptr: u64) -> DtzMap {
        DtzMap { ptr, idx: [0; 4] }
    }

    fn ptr(&self, wdl: Wdl) -> u64 {
        self.ptr
            + u64::from(self.idx[match wdl {
                Wdl::Loss => 1,
                Wdl::BlessedLoss => 3,
                Wdl::Draw => 0,
                Wdl::CursedWin => 2,
                Wdl::Win => 0,
            }])
    }
}

/// Description of encoding and compression for one subtable.
#[derive(Debug)]
struct PairsData {
    /// Encoding flags.
    flags: Flag,
    /// Piece configuration encoding info.
    groups: GroupData,

    /// Block size in bytes.
    block_size: u32,
    /// About every `span` values there is a sparse index entry.
    span: u32,
    /// Number of blocks in the table.
    blocks_num: u32,

    /// Offset of the symbol table.
    btree: u64,
    /// Minimum length in bits of the Huffman symbols, or the stored value
    /// for single-valued subtables.
    min_symlen: u8,
    /// Offset of the lowest symbols for each length.
    lowest_sym: u64,
    /// 64-bit padded lowest symbols for each length.
    base: Vec<u64>,
    /// Number of values represented by a given Huffman symbol, minus one.
    symlen: Vec<u8>,

    /// Offset of the sparse index.
    sparse_index: u64,
    /// Size of the sparse index.
    sparse_index_size: u32,

    /// Offset of the block length table.
    block_lengths: u64,
    /// Size of the block length table, padded to be bigger than `blocks_num`.
    block_length_size: u32,

    /// Start of compressed data, 64 byte aligned.
    data: u64,

    /// DTZ value map.
    dtz_map: Option<DtzMap>,
}

impl PairsData {
    fn parse<T: TableTag>(
        mapping: &Mapping,
        mut ptr: u64,
        groups: GroupData,
    ) -> SyzygyResult<(PairsData, u64)> {
        let flags = Flag::from_bits_truncate(mapping.read_u8(ptr)?);

        if flags.contains(Flag::SINGLE_VALUE) {
            let single_value = if T::METRIC == Metric::Wdl {
                mapping.read_u8(ptr + 1)?
            } else {
                0
            };

            return Ok((
                PairsData {
                    flags,
                    min_symlen: single_value,
                    groups,
                    base: Vec::new(),
                    block_lengths: 0,
                    block_length_size: 0,
                    block_size: 0,
                    blocks_num: 0,
                    btree: 0,
                    data: 0,
                    lowest_sym: 0,
                    span: 0,
                    sparse_index: 0,
                    sparse_index_size: 0,
                    symlen: Vec::new(),
                    dtz_map: None,
                },
                ptr + 2,
            ));
        }

        let tb_size = groups.factors[groups.lens.len()];
        let block_size = u!(1u32.checked_shl(u32::from(mapping.read_u8(ptr + 1)?)));
        let span = u!(1u32.checked_shl(u32::from(mapping.read_u8(ptr + 2)?)));
        let sparse_index_size = ((tb_size + u64::from(span) - 1) / u64::from(span)) as u32;
        let padding = mapping.read_u8(ptr + 3)?;
        let blocks_num = mapping.read_u32_le(ptr + 4)?;
        let block_length_size = u!(blocks_num.checked_add(u32::from(padding)));

        let max_symlen = mapping.read_u8(ptr + 8)?;
        let min_symlen = mapping.read_u8(ptr + 9)?;
        ensure!(min_symlen >= 1);
        ensure!(max_symlen >= min_symlen);
        ensure!(max_symlen <= 32);
        let h = usize::from(max_symlen - min_symlen + 1);

        let lowest_sym = ptr + 10;

        // Back-compute the base codes from the per-length first-code table,
        // then left-align them to 64 bits so the decoder can compare codes
        // of any length uniformly.
        let mut base = vec![0u64; h];
        for i in (0..h - 1).rev() {
            let offset = lowest_sym + i as u64 * 2;

            base[i] = u!(u!(base[i + 1]
                .checked_add(u64::from(mapping.read_u16_le(offset)?)))
                .checked_sub(u64::from(mapping.read_u16_le(offset + 2)?)))
                / 2;

            ensure!(base[i] * 2 >= base[i + 1]);
        }

        for i in 0..h {
            base[i] = u!(base[i].checked_shl(64 - u32::from(min_symlen) - i as u32));
        }

        // Initialize symlen.
        ptr += 10 + h as u64 * 2;
        let sym = mapping.read_u16_le(ptr)?;
        ptr += 2;
        let btree = ptr;

        let mut symlen = vec![0; usize::from(sym)];
        let mut visited = BitVec::from_elem(symlen.len(), false);
        for s in 0..sym {
            read_symlen(mapping, btree, &mut symlen, &mut visited, s, 0)?;
        }
        ptr += symlen.len() as u64 * 3 + (symlen.len() as u64 & 1);

        Ok((
            PairsData {
                flags,
                groups,

                block_size,
                span,
                blocks_num,

                btree,
                min_symlen,
                lowest_sym,
                base,
                symlen,

                sparse_index: 0,     // initialized later
                sparse_index_size,

                block_lengths: 0,    // initialized later
                block_length_size,

                data: 0,             // initialized later

                dtz_map: None,       // initialized later
            },
            ptr,
        ))
    }
}

/// Build the symlen table, recursing through the symbol tree.
fn read_symlen(
    mapping: &Mapping,
    btree: u64,
    symlen: &mut Vec<u8>,
    visited: &mut BitVec,
    sym: u16,
    depth: u8,
) -> SyzygyResult<()> {
    if u!(visited.get(usize::from(sym))) {
        return Ok(());
    }

    // A valid symbol tree has depth at most 255, because the expanded
    // length strictly decreases towards the leaves.
    ensure!(depth < u8::MAX);

    let (left, right) = mapping.read_lr(btree + 3 * u64::from(sym))?;

    if right == 0xfff {
        symlen[usize::from(sym)] = 0;
    } else {
        read_symlen(mapping, btree, symlen, visited, left, depth + 1)?;
        read_symlen(mapping, btree, symlen, visited, right, depth + 1)?;
        let expanded = u!(symlen[usize::from(left)]
            .checked_add(symlen[usize::from(right)])
            .and_then(|s| s.checked_add(1)));
        symlen[usize::from(sym)] = expanded;
    }

    visited.set(usize::from(sym), true);
    Ok(())
}

/// Encoding and compression info for both sides of a file bucket.
#[derive(Debug)]
struct FileData {
    sides: ArrayVec<PairsData, 2>,
}

/// A memory-mapped Syzygy table.
#[derive(Debug)]
pub(crate) struct Table<T: TableTag> {
    metric: PhantomData<T>,
    mapping: Mapping,
    material: Material,
    num_unique_pieces: u8,
    files: ArrayVec<FileData, 4>,
}

impl<T: TableTag> Table<T> {
    /// Maps the table file at `path` and parses all subtable headers.
    /// The bulk sections are not copied; the parsed structures point into
    /// the mapping.
    pub fn open(path: &Path, material: &Material) -> SyzygyResult<Table<T>> {
        let material = material.clone();
        ensure!(material.count() <= MAX_PIECES);

        let magic = match T::METRIC {
            Metric::Wdl => &WDL_MAGIC,
            Metric::Dtz => &DTZ_MAGIC,
        };

        let mapping = Mapping::open(path, magic)?;
        log::trace!("mapped table file {}", path.display());

        // Read layout flags.
        let layout = Layout::from_bits_truncate(mapping.read_u8(4)?);
        let has_pawns = layout.contains(Layout::HAS_PAWNS);
        let split = layout.contains(Layout::SPLIT);

        // Check consistency of layout and material key.
        ensure!(has_pawns == material.has_pawns());
        ensure!(split != material.is_symmetric());

        // Read group data.
        let pp = material.white.has_pawns() && material.black.has_pawns();
        let num_files = if has_pawns { 4 } else { 1 };
        let num_sides = if T::METRIC == Metric::Wdl && !material.is_symmetric() {
            2
        } else {
            1
        };

        let mut groups: ArrayVec<ArrayVec<GroupData, 2>, 4> = ArrayVec::new();
        let mut ptr = 5;

        for file in 0..num_files {
            let mut sides = ArrayVec::new();

            let order = [
                [
                    mapping.read_u8(ptr)? & 0xf,
                    if pp { mapping.read_u8(ptr + 1)? & 0xf } else { 0xf },
                ],
                [
                    mapping.read_u8(ptr)? >> 4,
                    if pp { mapping.read_u8(ptr + 1)? >> 4 } else { 0xf },
                ],
            ];

            ptr += 1 + u64::from(pp);

            for side in [Color::White, Color::Black].into_iter().take(num_sides) {
                let pieces = parse_pieces(&mapping, ptr, material.count(), side)?;
                let key = Material::from_iter(pieces.iter().copied());
                ensure!(key == material || key.flipped() == material);

                let group = GroupData::new(pieces, &order[side.fold_wb(0, 1)], file)?;
                sides.push(group);
            }

            ptr += material.count() as u64;

            groups.push(sides);
        }

        ptr += ptr & 1;

        // The canonical orientation of the table is given by the first
        // piece list, not by the possibly flipped key used for lookup.
        let material = Material::from_iter(groups[0][0].pieces.iter().copied());

        // Read the pairs headers.
        let mut files: ArrayVec<FileData, 4> = ArrayVec::new();

        for f in 0..num_files {
            let mut sides = ArrayVec::new();

            for side in 0..num_sides {
                let group = groups[f][side].clone();
                let (pairs, next_ptr) = PairsData::parse::<T>(&mapping, ptr, group)?;
                sides.push(pairs);
                ptr = next_ptr;
            }

            files.push(FileData { sides });
        }

        // For DTZ tables, the value maps follow the headers.
        if T::METRIC == Metric::Dtz {
            let map = ptr;

            for f in 0..num_files {
                if files[f].sides[0].flags.contains(Flag::MAPPED) {
                    let mut dtz_map = DtzMap::new(map);

                    for i in 0..4 {
                        dtz_map.idx[i] = u!(u16::try_from(ptr - map + 1).ok());
                        ptr += u64::from(mapping.read_u8(ptr)?) + 1;
                    }

                    files[f].sides[0].dtz_map = Some(dtz_map);
                }
            }

            ptr += ptr & 1;
        }

        // The bulk sections in order: sparse indices, block length tables,
        // then the compressed blocks, 64 byte aligned.
        for f in 0..num_files {
            for s in 0..num_sides {
                files[f].sides[s].sparse_index = ptr;
                ptr += u64::from(files[f].sides[s].sparse_index_size) * 6;
            }
        }

        for f in 0..num_files {
            for s in 0..num_sides {
                files[f].sides[s].block_lengths = ptr;
                ptr += u64::from(files[f].sides[s].block_length_size) * 2;
            }
        }

        for f in 0..num_files {
            for s in 0..num_sides {
                ptr = (ptr + 0x3f) & !0x3f;
                files[f].sides[s].data = ptr;
                ptr = u!(ptr.checked_add(
                    u64::from(files[f].sides[s].blocks_num)
                        * u64::from(files[f].sides[s].block_size)
                ));
            }
        }

        Ok(Table {
            metric: PhantomData,
            mapping,
            num_unique_pieces: material.unique_pieces(),
            files,
            material,
        })
    }

    /// Decompress the byte stored for a positional index.
    fn decompress_pairs(&self, d: &PairsData, idx: u64) -> SyzygyResult<u8> {
        if d.flags.contains(Flag::SINGLE_VALUE) {
            return Ok(d.min_symlen);
        }

        // Locate the block containing the value, starting from the sparse
        // index entry and walking the block length table.
        let k = idx / u64::from(d.span);
        ensure!(k < u64::from(d.sparse_index_size));

        let mut block = u64::from(self.mapping.read_u32_le(d.sparse_index + 6 * k)?);
        let mut offset = i64::from(self.mapping.read_u16_le(d.sparse_index + 6 * k + 4)?);

        let diff = idx as i64 % i64::from(d.span) - i64::from(d.span) / 2;
        offset += diff;

        while offset < 0 {
            block = u!(block.checked_sub(1));
            offset += i64::from(self.mapping.read_u16_le(d.block_lengths + block * 2)?) + 1;
        }

        while offset > i64::from(self.mapping.read_u16_le(d.block_lengths + block * 2)?) {
            offset -= i64::from(self.mapping.read_u16_le(d.block_lengths + block * 2)?) + 1;
            block += 1;
        }

        // Initialize the shift register and decode canonical code words
        // until the remaining offset fits into one symbol.
        let mut ptr = d.data + block * u64::from(d.block_size);

        let mut buf = self.mapping.read_u64_be(ptr)?;
        ptr += 8;
        let mut buf_size = 64i32;

        let mut sym;

        loop {
            let mut len = 0usize;

            while buf < *u!(d.base.get(len)) {
                len += 1;
            }

            sym = ((buf - d.base[len]) >> (64 - len - usize::from(d.min_symlen))) as u16;
            sym = u!(sym.checked_add(self.mapping.read_u16_le(d.lowest_sym + 2 * len as u64)?));

            if offset < i64::from(*u!(d.symlen.get(usize::from(sym)))) + 1 {
                break;
            }

            offset -= i64::from(d.symlen[usize::from(sym)]) + 1;
            len += usize::from(d.min_symlen);
            buf <<= len;
            buf_size -= len as i32;

            // Refill the register with a big-endian word once 32 bits are
            // consumed.
            if buf_size <= 32 {
                buf_size += 32;
                buf |= u64::from(self.mapping.read_u32_be(ptr)?) << (64 - buf_size);
                ptr += 4;
            }
        }

        // Descend the symbol tree to the terminal byte.
        while *u!(d.symlen.get(usize::from(sym))) != 0 {
            let (left, right) = self.mapping.read_lr(d.btree + 3 * u64::from(sym))?;

            if offset < i64::from(*u!(d.symlen.get(usize::from(left)))) + 1 {
                sym = left;
            } else {
                offset -= i64::from(d.symlen[usize::from(left)]) + 1;
                sym = right;
            }
        }

        self.mapping.read_u8(d.btree + 3 * u64::from(sym))
    }

    /// Map a position to its subtable and 64-bit index under the canonical
    /// orbit of board symmetries.
    fn encode(&self, pos: &Chess) -> SyzygyResult<Option<(&PairsData, u64)>> {
        let key = Material::from_board(pos.board());

        let symmetric_btm = self.material.is_symmetric() && pos.turn().is_black();
        let black_stronger = key != self.material;
        let flip = symmetric_btm || black_stronger;
        let bside = pos.turn().is_black() ^ flip;

        let mut squares: ArrayVec<Square, MAX_PIECES> = ArrayVec::new();
        let mut used = Bitboard::EMPTY;

        // For pawn tables the leading pawns select the file bucket.
        let file = if self.material.has_pawns() {
            let reference_pawn = self.files[0].sides[0].groups.pieces[0];
            ensure!(reference_pawn.role == Role::Pawn);
            let color = if flip {
                !reference_pawn.color
            } else {
                reference_pawn.color
            };

            let lead_pawns = pos.board().pawns() & pos.board().by_color(color);
            used |= lead_pawns;

            for pawn in lead_pawns {
                squares.push(if flip { pawn.flip_vertical() } else { pawn });
            }

            // Ensure squares[0] is the maximum with regard to map_pawns.
            for i in 1..squares.len() {
                if CONSTS.map_pawns[squares[0] as usize] < CONSTS.map_pawns[squares[i] as usize] {
                    squares.swap(0, i);
                }
            }

            if squares[0].file() >= File::E {
                squares[0].flip_horizontal().file() as usize
            } else {
                squares[0].file() as usize
            }
        } else {
            0
        };

        let side = &self.files[file].sides[if bside {
            self.files[file].sides.len() - 1
        } else {
            0
        }];

        // A DTZ table is one-sided. Let the caller probe from the other
        // side if the table stores the other side to move.
        if T::METRIC == Metric::Dtz
            && side.flags.contains(Flag::STM) != bside
            && (!self.material.is_symmetric() || self.material.has_pawns())
        {
            return Ok(None);
        }

        let lead_pawns_count = squares.len();

        // Collect the remaining pieces in the canonical order enforced by
        // the subtable.
        for piece in side.groups.pieces.iter().skip(lead_pawns_count) {
            let color = if flip { !piece.color } else { piece.color };
            let square = u!((pos.board().by_piece(piece.role.of(color)) & !used).first());
            squares.push(if flip { square.flip_vertical() } else { square });
            used |= Bitboard::from(square);
        }

        ensure!(squares.len() >= 2);

        // Mirror onto files a-d.
        if squares[0].file() >= File::E {
            for square in &mut squares {
                *square = square.flip_horizontal();
            }
        }

        let mut idx = if self.material.has_pawns() {
            let mut idx = CONSTS.lead_pawn_idx[lead_pawns_count][squares[0] as usize];

            squares[1..lead_pawns_count]
                .sort_unstable_by_key(|sq| CONSTS.map_pawns[*sq as usize]);

            for i in 1..lead_pawns_count {
                idx += binomial(CONSTS.map_pawns[squares[i] as usize], i as u64);
            }

            idx
        } else {
            // Mirror onto ranks 1-4.
            if squares[0].rank() >= Rank::Fifth {
                for square in &mut squares {
                    *square = square.flip_vertical();
                }
            }

            // Look at the first square of the leading group that is off the
            // a1-h8 diagonal. If it is above the diagonal, transpose.
            for i in 0..side.groups.lens[0] {
                if !offdiag(squares[i]) {
                    continue;
                }

                if (squares[i].rank() as u32) > (squares[i].file() as u32) {
                    for square in &mut squares[i..] {
                        *square = square.flip_diagonal();
                    }
                }

                break;
            }

            if self.num_unique_pieces > 2 {
                let adjust1 = u64::from(squares[1] > squares[0]);
                let adjust2 = u64::from(squares[2] > squares[0]) + u64::from(squares[2] > squares[1]);

                // The leading group is three unique pieces. The encoding
                // depends on which of them are on the a1-h8 diagonal.
                if offdiag(squares[0]) {
                    TRIANGLE[squares[0] as usize] * 63 * 62
                        + (squares[1] as u64 - adjust1) * 62
                        + (squares[2] as u64 - adjust2)
                } else if offdiag(squares[1]) {
                    6 * 63 * 62
                        + squares[0].rank() as u64 * 28 * 62
                        + LOWER[squares[1] as usize] * 62
                        + squares[2] as u64
                        - adjust2
                } else if offdiag(squares[2]) {
                    6 * 63 * 62
                        + 4 * 28 * 62
                        + squares[0].rank() as u64 * 7 * 28
                        + (squares[1].rank() as u64 - adjust1) * 28
                        + LOWER[squares[2] as usize]
                } else {
                    6 * 63 * 62
                        + 4 * 28 * 62
                        + 4 * 7 * 28
                        + squares[0].rank() as u64 * 7 * 6
                        + (squares[1].rank() as u64 - adjust1) * 6
                        + (squares[2].rank() as u64 - adjust2)
                }
            } else {
                // The leading group is the two kings.
                KK_IDX[TRIANGLE[squares[0] as usize] as usize][squares[1] as usize]
            }
        };

        idx *= side.groups.factors[0];

        // Encode the remaining groups, trailing pawns first if any.
        let mut remaining_pawns = self.material.white.has_pawns() && self.material.black.has_pawns();
        let mut next = 1;
        let mut group_sq = side.groups.lens[0];

        for lens in side.groups.lens.iter().copied().skip(1) {
            let (prev_squares, group_squares) = squares.split_at_mut(group_sq);
            let group_squares = &mut group_squares[..lens];
            group_squares.sort_unstable();

            let mut n = 0;

            for i in 0..lens {
                let adjust = prev_squares
                    .iter()
                    .filter(|sq| group_squares[i] > **sq)
                    .count() as u64;
                n += binomial(
                    group_squares[i] as u64 - adjust - if remaining_pawns { 8 } else { 0 },
                    i as u64 + 1,
                );
            }

            remaining_pawns = false;
            idx += n * side.groups.factors[next];
            group_sq += lens;
            next += 1;
        }

        Ok(Some((side, idx)))
    }
}

impl Table<WdlTag> {
    pub fn probe_wdl_table(&self, pos: &Chess) -> SyzygyResult<Wdl> {
        // WDL tables are two-sided, so encoding always succeeds.
        let (side, idx) = u!(self.encode(pos)?);
        let decompressed = self.decompress_pairs(side, idx)?;

        Ok(match decompressed {
            0 => Wdl::Loss,
            1 => Wdl::BlessedLoss,
            2 => Wdl::Draw,
            3 => Wdl::CursedWin,
            4 => Wdl::Win,
            _ => throw!(),
        })
    }
}

impl Table<DtzTag> {
    /// Probes the raw DTZ value. Returns `None` if the table stores only
    /// the other side to move.
    pub fn probe_dtz_table(&self, pos: &Chess, wdl: Wdl) -> SyzygyResult<Option<Dtz>> {
        let (side, idx) = match self.encode(pos)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let res = self.decompress_pairs(side, idx)?;

        // Remap the stored value into the band selected by the WDL value.
        let res = i32::from(match side.dtz_map {
            Some(ref map) => self.mapping.read_u8(map.ptr(wdl) + u64::from(res))?,
            None => res,
        });

        // Plies are stored directly or as move counts, depending on the
        // flags and the band.
        let stores_moves = match wdl {
            Wdl::Win => !side.flags.contains(Flag::WIN_PLIES),
            Wdl::Loss => !side.flags.contains(Flag::LOSS_PLIES),
            Wdl::CursedWin | Wdl::BlessedLoss => true,
            Wdl::Draw => false,
        };

        Ok(Some(Dtz(if stores_moves { res * 2 } else { res })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_to_piece() {
        assert_eq!(byte_to_piece(6), Some(Role::King.of(Color::White)));
        assert_eq!(byte_to_piece(8 | 1), Some(Role::Pawn.of(Color::Black)));
        assert_eq!(byte_to_piece(0), None);
        assert_eq!(byte_to_piece(7), None);
    }

    #[test]
    fn test_triangle_symmetries() {
        for sq in (0..64).map(Square::new) {
            let mirrored = sq.flip_horizontal();
            assert_eq!(TRIANGLE[sq as usize], TRIANGLE[mirrored as usize]);
            let flipped = sq.flip_vertical();
            assert_eq!(TRIANGLE[sq as usize], TRIANGLE[flipped as usize]);
        }
    }

    #[test]
    fn test_kk_idx_bounds() {
        let max = KK_IDX
            .iter()
            .flat_map(|row| row.iter())
            .max()
            .copied()
            .expect("non-empty");
        assert_eq!(max, 461);
    }

    #[test]
    fn test_consts() {
        // One leading pawn: six candidate ranks per file bucket.
        for file in 0..4 {
            assert_eq!(CONSTS.lead_pawns_size[1][file], 6);
        }

        // Every pawn square gets a distinct slot below 48.
        for rank in 1..7 {
            for file in 0..8 {
                let sq = Square::from_coords(File::new(file), Rank::new(rank));
                assert!(CONSTS.map_pawns[sq as usize] < 48);
            }
        }
    }

    #[test]
    fn test_group_pieces() {
        // KQvK has three unique pieces forming the leading group.
        let pieces: Pieces = [
            Role::King.of(Color::White),
            Role::Queen.of(Color::White),
            Role::King.of(Color::Black),
        ]
        .into_iter()
        .collect();
        assert_eq!(&group_pieces(&pieces)[..], &[3]);

        // KQQvK groups the kings, then the identical queens.
        let pieces: Pieces = [
            Role::King.of(Color::White),
            Role::King.of(Color::Black),
            Role::Queen.of(Color::White),
            Role::Queen.of(Color::White),
        ]
        .into_iter()
        .collect();
        assert_eq!(&group_pieces(&pieces)[..], &[2, 2]);
    }
}
