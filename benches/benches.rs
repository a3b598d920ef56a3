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

use bencher::{benchmark_group, benchmark_main, black_box, Bencher};
use shakmaty::{fen::Fen, CastlingMode, Chess};
use sixman::Tablebase;

// Point this at a directory with real table files to get meaningful
// numbers. The benchmarks are skipped when it is absent.
const TABLES: &str = "tables/chess";

fn bench_add_directory(bench: &mut Bencher) {
    bench.iter(|| {
        let mut tablebase = Tablebase::new();
        tablebase.add_directory(TABLES);
        tablebase
    });
}

fn bench_probe_wdl(bench: &mut Bencher) {
    let mut tablebase = Tablebase::new();
    if tablebase.add_directory(TABLES) == 0 {
        return;
    }

    let pos: Chess = "8/8/8/8/B7/N7/K2k4/8 b - - 0 1"
        .parse::<Fen>()
        .expect("valid fen")
        .into_position(CastlingMode::Standard)
        .expect("legal position");

    bench.iter(|| tablebase.probe_wdl(black_box(&pos)).expect("probe wdl"));
}

benchmark_group!(benches, bench_add_directory, bench_probe_wdl);
benchmark_main!(benches);
