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

use std::fs::File;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use memmap2::Mmap;

use crate::errors::{SyzygyError, SyzygyResult};

/// Separator for search path strings, `;` on Windows and `:` elsewhere.
pub(crate) const PATH_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// Splits a search path string into its directories, skipping empty
/// segments.
pub(crate) fn split_search_path(paths: &str) -> Vec<PathBuf> {
    paths
        .split(PATH_SEPARATOR)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Searches the configured directories in order for a file with the given
/// name. The first hit wins.
pub(crate) fn find_table_file(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(name))
        .find(|path| path.is_file())
}

/// A read-only memory mapping of a table file.
///
/// All multi-byte reads are little endian except for the compressed block
/// stream, which is consumed as big endian words. Reads are bounds checked
/// against the mapping, so a truncated file surfaces as a corruption error
/// instead of a fault.
#[derive(Debug)]
pub(crate) struct Mapping {
    mmap: Mmap,
}

impl Mapping {
    /// Maps the file at `path` and verifies the four magic bytes.
    ///
    /// The mapping stays valid for the lifetime of the returned value and is
    /// released when it is dropped.
    pub fn open(path: &Path, magic: &[u8; 4]) -> SyzygyResult<Mapping> {
        let file = File::open(path).map_err(|error| SyzygyError::Read { error })?;

        // Safety: table files are opened read-only and the crate level
        // contract requires that they are not modified while mapped.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|error| SyzygyError::Read { error })?;

        if mmap.get(..4) != Some(&magic[..]) {
            return Err(SyzygyError::Magic);
        }

        Ok(Mapping { mmap })
    }

    fn bytes(&self, ptr: u64, len: usize) -> SyzygyResult<&[u8]> {
        let start = u!(usize::try_from(ptr).ok());
        let end = u!(start.checked_add(len));
        Ok(u!(self.mmap.get(start..end)))
    }

    pub fn read_u8(&self, ptr: u64) -> SyzygyResult<u8> {
        Ok(self.bytes(ptr, 1)?[0])
    }

    pub fn read_u16_le(&self, ptr: u64) -> SyzygyResult<u16> {
        Ok(LittleEndian::read_u16(self.bytes(ptr, 2)?))
    }

    pub fn read_u32_le(&self, ptr: u64) -> SyzygyResult<u32> {
        Ok(LittleEndian::read_u32(self.bytes(ptr, 4)?))
    }

    pub fn read_u32_be(&self, ptr: u64) -> SyzygyResult<u32> {
        Ok(BigEndian::read_u32(self.bytes(ptr, 4)?))
    }

    pub fn read_u64_be(&self, ptr: u64) -> SyzygyResult<u64> {
        Ok(BigEndian::read_u64(self.bytes(ptr, 8)?))
    }

    /// Reads a 3 byte symbol record packing two 12 bit values.
    pub fn read_lr(&self, ptr: u64) -> SyzygyResult<(u16, u16)> {
        let buf = self.bytes(ptr, 3)?;
        let left = (u16::from(buf[1] & 0xf) << 8) | u16::from(buf[0]);
        let right = (u16::from(buf[2]) << 4) | (u16::from(buf[1]) >> 4);
        Ok((left, right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_search_path() {
        let sep = PATH_SEPARATOR;
        let paths = format!("/a/b{}{}/c", sep, sep);
        let dirs = split_search_path(&paths);
        assert_eq!(dirs, vec![PathBuf::from("/a/b"), PathBuf::from("/c")]);
        assert!(split_search_path("").is_empty());
    }
}
