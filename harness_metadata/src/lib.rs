// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Data shared between the fixture harness stages: fixtures as loaded from disk, the symbol
//! facts extracted from their declarations, and the verdicts produced for them.

pub use facts::*;
pub use fixture::*;
pub use verdict::*;

mod facts;
mod fixture;
mod verdict;
