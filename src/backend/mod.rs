//! Sink implementations and the async worker that feeds them (§4).

pub mod batched_sink;
pub mod compression;
pub mod mmap_sink;
pub mod ring_buffer;
pub mod rotating_sink;
pub mod worker;

pub use batched_sink::BatchedSink;
pub use mmap_sink::MappedSink;
pub use ring_buffer::{OverflowPolicy, RingBuffer, RingBufferStats};
pub use rotating_sink::RotatingSink;
pub use worker::AsyncWorker;
