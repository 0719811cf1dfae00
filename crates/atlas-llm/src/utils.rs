//! Stream plumbing shared by adapters (SSE framing, event accumulation).

pub mod sse;
pub mod stream_accumulator;

pub use sse::*;
pub use stream_accumulator::*;
