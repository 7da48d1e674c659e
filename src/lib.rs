//! Bit-packed, multi-threaded Conway's Game of Life (B3/S23) on a fixed torus.

pub mod packedlife;
pub use packedlife::{
    BufferRole, GridError, KernelBackend, NullSink, OutputSink, PackedLife, PackedLifeConfig,
    WordChange,
};
