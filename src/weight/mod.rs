// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

pub mod filter;
pub mod interface;
pub mod scale;

pub use filter::WeightFilter;
pub use scale::{Calibration, WeightScale};

/// One raw transducer reading, stamped when it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingSample {
    pub raw: i32,
    pub timestamp_ms: u64,
}
