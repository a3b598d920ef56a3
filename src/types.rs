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

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use arrayvec::ArrayVec;
use shakmaty::Piece;

/// Tables are available for positions with up to 6 pieces.
pub const MAX_PIECES: usize = 6;

/// List of up to [`MAX_PIECES`] pieces.
pub(crate) type Pieces = ArrayVec<Piece, MAX_PIECES>;

/// Magic initial bytes of a WDL (`.rtbw`) table file.
pub(crate) const WDL_MAGIC: [u8; 4] = [0x71, 0xe8, 0x23, 0x5d];

/// Magic initial bytes of a DTZ (`.rtbz`) table file.
pub(crate) const DTZ_MAGIC: [u8; 4] = [0xd7, 0x66, 0x0c, 0xa5];

/// Extension of WDL table files.
pub(crate) const TBW_EXTENSION: &str = "rtbw";

/// Extension of DTZ table files.
pub(crate) const TBZ_EXTENSION: &str = "rtbz";

/// 5-valued evaluation of a position in the context of the 50-move drawing
/// rule.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(i8)]
pub enum Wdl {
    /// Unconditional loss for the side to move.
    Loss = -2,
    /// Loss that can be saved by the 50-move rule.
    BlessedLoss = -1,
    /// Unconditional draw.
    Draw = 0,
    /// Win that can be frustrated by the 50-move rule.
    CursedWin = 1,
    /// Unconditional win.
    Win = 2,
}

impl Neg for Wdl {
    type Output = Wdl;

    fn neg(self) -> Wdl {
        match self {
            Wdl::Loss => Wdl::Win,
            Wdl::BlessedLoss => Wdl::CursedWin,
            Wdl::Draw => Wdl::Draw,
            Wdl::CursedWin => Wdl::BlessedLoss,
            Wdl::Win => Wdl::Loss,
        }
    }
}

macro_rules! from_wdl_impl {
    ($($t:ty)+) => {
        $(impl From<Wdl> for $t {
            #[inline]
            fn from(wdl: Wdl) -> $t {
                wdl as $t
            }
        })+
    }
}

from_wdl_impl! { i8 i16 i32 i64 }

/// Distance to zeroing of the half-move clock.
///
/// Can be off by one: `Dtz(-n)` can mean a loss in `n + 1` plies and `Dtz(n)`
/// can mean a win in `n + 1` plies. This is guaranteed not to happen for
/// positions exactly on the edge of the 50-move rule, so that this never
/// impacts results of practical play.
///
/// | DTZ | WDL | |
/// | --- | --- | --- |
/// | `-100 <= n <= -1` | Loss | Unconditional loss (assuming the 50-move counter is zero). Zeroing move can be forced in `-n` plies. |
/// | `n < -100` | Blessed loss | Loss, but draw under the 50-move rule. A zeroing move can be forced in `-n` plies or `-n - 100` plies (if a later phase is responsible for the blessing). |
/// | 0 | Draw | |
/// | `100 < n` | Cursed win | Win, but draw under the 50-move rule. A zeroing move can be forced in `n` or `n - 100` plies (if a later phase is responsible for the curse). |
/// | `1 <= n <= 100` | Win | Unconditional win (assuming the 50-move counter is zero). Zeroing move can be forced in `n` plies. |
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Dtz(pub i32);

impl Dtz {
    /// The DTZ reached by playing the best zeroing move in a position with
    /// the given WDL value.
    pub fn before_zeroing(wdl: Wdl) -> Dtz {
        match wdl {
            Wdl::Loss => Dtz(-1),
            Wdl::BlessedLoss => Dtz(-101),
            Wdl::Draw => Dtz(0),
            Wdl::CursedWin => Dtz(101),
            Wdl::Win => Dtz(1),
        }
    }

    /// Increases the absolute non-zero value by `plies`.
    pub fn add_plies(self, plies: i32) -> Dtz {
        Dtz(self.0.signum() * (self.0.abs() + plies))
    }
}

macro_rules! from_dtz_impl {
    ($($t:ty)+) => {
        $(impl From<Dtz> for $t {
            #[inline]
            fn from(dtz: Dtz) -> $t {
                dtz.0.into()
            }
        })+
    }
}

from_dtz_impl! { i32 i64 }

macro_rules! dtz_from_impl {
    ($($t:ty)+) => {
        $(impl From<$t> for Dtz {
            #[inline]
            fn from(dtz: $t) -> Dtz {
                Dtz(i32::from(dtz))
            }
        })+
    }
}

dtz_from_impl! { u8 i8 u16 i16 i32 }

impl Neg for Dtz {
    type Output = Dtz;

    #[inline]
    fn neg(self) -> Dtz {
        Dtz(-self.0)
    }
}

impl Add for Dtz {
    type Output = Dtz;

    #[inline]
    fn add(self, other: Dtz) -> Dtz {
        Dtz(self.0 + other.0)
    }
}

impl AddAssign for Dtz {
    #[inline]
    fn add_assign(&mut self, other: Dtz) {
        self.0 += other.0;
    }
}

impl Sub for Dtz {
    type Output = Dtz;

    #[inline]
    fn sub(self, other: Dtz) -> Dtz {
        Dtz(self.0 - other.0)
    }
}

impl SubAssign for Dtz {
    #[inline]
    fn sub_assign(&mut self, other: Dtz) {
        self.0 -= other.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wdl_neg() {
        assert_eq!(-Wdl::Win, Wdl::Loss);
        assert_eq!(-Wdl::CursedWin, Wdl::BlessedLoss);
        assert_eq!(-Wdl::Draw, Wdl::Draw);
        assert_eq!(i8::from(-Wdl::BlessedLoss), 1);
    }

    #[test]
    fn test_before_zeroing() {
        assert_eq!(Dtz::before_zeroing(Wdl::Loss), Dtz(-1));
        assert_eq!(Dtz::before_zeroing(Wdl::BlessedLoss), Dtz(-101));
        assert_eq!(Dtz::before_zeroing(Wdl::Draw), Dtz(0));
        assert_eq!(Dtz::before_zeroing(Wdl::CursedWin), Dtz(101));
        assert_eq!(Dtz::before_zeroing(Wdl::Win), Dtz(1));
    }

    #[test]
    fn test_dtz_arithmetic() {
        assert_eq!(Dtz(5).add_plies(20), Dtz(25));
        assert_eq!(Dtz(-5).add_plies(20), Dtz(-25));
        assert_eq!(Dtz(101).add_plies(9), Dtz(110));
        assert_eq!(-Dtz(3), Dtz(-3));
        assert_eq!(Dtz(3) + Dtz(4), Dtz(7));
        assert_eq!(Dtz(3) - Dtz(4), Dtz(-1));
    }
}
