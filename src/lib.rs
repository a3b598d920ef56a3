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

//! Probe Syzygy endgame tablebases.
//!
//! Syzygy tables allow optimal play under the 50-move rule for positions
//! with up to 6 pieces. The tables come in pairs of files: WDL tables
//! (`.rtbw`) store win/draw/loss information including the effects of the
//! 50-move rule, and DTZ tables (`.rtbz`) store the distance to the next
//! capture or pawn move under optimal play.
//!
//! Table files are memory-mapped on first probe and read without copying.
//! The chess rules themselves (position representation, move generation,
//! legality) are provided by [`shakmaty`].
//!
//! # Example
//!
//! ```no_run
//! use shakmaty::{fen::Fen, CastlingMode, Chess};
//! use sixman::{Tablebase, Wdl};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tables = Tablebase::new();
//! tables.add_directory("tables/syzygy");
//!
//! let pos: Chess = "8/8/8/8/B7/N7/K2k4/8 b - - 0 1"
//!     .parse::<Fen>()?
//!     .into_position(CastlingMode::Standard)?;
//!
//! let wdl = tables.probe_wdl(&pos)?;
//! assert_eq!(wdl, Wdl::Loss);
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Probing a position whose material is not covered by the registered
//! tables fails with [`SyzygyError::MissingTable`]. Probing is also
//! rejected for positions with castling rights or more than
//! [`MAX_PIECES`] pieces. Corrupted table files are detected and reported;
//! they never cause a panic.

#![warn(missing_debug_implementations)]

#[macro_use]
mod errors;

mod filesystem;
mod lazy;
mod material;
mod table;
mod tablebase;
mod types;

pub use crate::errors::{SyzygyError, SyzygyResult};
pub use crate::material::{Material, MaterialSide, ParseMaterialError};
pub use crate::tablebase::Tablebase;
pub use crate::types::{Dtz, Wdl, MAX_PIECES};
