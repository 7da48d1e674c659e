//! PackedLife engine internals and public API.

mod edge;
mod engine;
mod error;
mod grid;
mod kernel;
mod partition;
mod sink;
mod task;
mod torus;

pub use engine::PackedLife;
pub use engine::PackedLifeConfig;
pub use error::{GridError, Result};
pub use grid::WORD_BITS;
pub use kernel::{Kernel, KernelBackend, Remainder, step_word_scalar};
#[cfg(target_arch = "x86_64")]
pub use kernel::step_word_sse41;
pub use partition::{DEFAULT_FLUSH_FRACTION, plan};
pub use sink::{BufferRole, NullSink, OutputSink, WordChange};
pub use task::{CancelToken, Task};
pub use torus::Torus;
