//! Buffer management for zero-copy I/O.

pub mod fixed;
