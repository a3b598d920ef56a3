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

//! Probe a position given as a FEN:
//!
//! ```text
//! cargo run --example probe -- --path /path/to/tables "K7/8/8/8/8/8/8/k6Q w - - 0 1"
//! ```

use std::error::Error;
use std::path::PathBuf;

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Position};
use structopt::StructOpt;

use sixman::Tablebase;

/// Probe Syzygy tables for a position.
#[derive(Debug, StructOpt)]
struct Opt {
    /// Tablebase directories. May be given more than once.
    #[structopt(long = "path", parse(from_os_str))]
    path: Vec<PathBuf>,
    /// The position to probe.
    fen: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    let mut tables = Tablebase::new();
    let mut found = 0;
    for path in opt.path {
        found += tables.add_directory(path);
    }
    eprintln!("{} tables with up to {} pieces", found, tables.max_pieces());

    let pos: Chess = opt.fen.parse::<Fen>()?.into_position(CastlingMode::Standard)?;

    let wdl = tables.probe_wdl(&pos)?;
    let dtz = tables.probe_dtz(&pos)?;
    println!("wdl: {}, dtz: {}", i32::from(wdl), i32::from(dtz));

    let mut moves = pos.legal_moves();
    tables.root_probe(&pos, &mut moves, false)?;
    println!(
        "preserving moves: {}",
        moves
            .iter()
            .map(|m| m.to_uci(CastlingMode::Standard).to_string())
            .collect::<Vec<_>>()
            .join(" ")
    );

    match tables.best_move(&pos)? {
        Some((m, dtz)) => println!(
            "best: {} (dtz {})",
            m.to_uci(CastlingMode::Standard),
            i32::from(dtz)
        ),
        None => println!("no legal moves"),
    }

    Ok(())
}
