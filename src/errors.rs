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

use std::io;

use thiserror::Error;

use crate::material::Material;

/// A [`Result`] type for Syzygy tablebase probes.
pub type SyzygyResult<T> = Result<T, SyzygyError>;

/// Error when probing a table.
#[derive(Debug, Error)]
pub enum SyzygyError {
    /// Position has castling rights, but Syzygy tables do not contain
    /// positions with castling rights.
    #[error("syzygy tables do not contain positions with castling rights")]
    Castling,
    /// Position has too many pieces. This library supports tables with up
    /// to 6 pieces.
    #[error("syzygy tables only contain positions with up to 6 pieces")]
    TooManyPieces,
    /// Missing table.
    #[error("required table not found: {material}")]
    MissingTable {
        /// The material signature of the missing table.
        material: Material,
    },
    /// I/O error.
    #[error("i/o error when reading a table: {error}")]
    Read {
        /// The underlying error.
        #[source]
        error: io::Error,
    },
    /// Table file has unexpected magic header bytes.
    #[error("table file has invalid magic bytes")]
    Magic,
    /// Corrupted table.
    #[error("corrupted table (detected in {file} l. {line})")]
    CorruptedTable {
        file: &'static str,
        line: u32,
    },
}

impl From<io::Error> for SyzygyError {
    fn from(error: io::Error) -> SyzygyError {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => SyzygyError::CorruptedTable {
                file: file!(),
                line: line!(),
            },
            _ => SyzygyError::Read { error },
        }
    }
}

/// Return a `CorruptedTable` error.
macro_rules! throw {
    () => {
        return Err($crate::errors::SyzygyError::CorruptedTable {
            file: file!(),
            line: line!(),
        })
    };
}

/// Unwrap an `Option` or return a `CorruptedTable` error.
macro_rules! u {
    ($e:expr) => {
        match $e {
            Some(ok) => ok,
            None => throw!(),
        }
    };
}

/// Ensure that a condition holds. Otherwise return a `CorruptedTable` error.
macro_rules! ensure {
    ($cond:expr) => {
        if !$cond {
            throw!();
        }
    };
}
