//! I/O utilities for bidirectional relay.
//!
//! This module provides the copy loop shared by every relay session,
//! independent of the transports on either side.

mod copy;

pub use copy::{
    CopyOptions, DirectionEnd, DirectionReport, NoOpMetrics, PairReport, RelayMetrics, copy_pair,
};
