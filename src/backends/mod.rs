// SPDX-License-Identifier: GPL-3.0-only

//! Camera backends
//!
//! - [`emulated`]: software camera driven by a simulated sensor

pub mod emulated;
