//! Fixed-size buffer pool bound to a delivery stream.
//!
//! Every buffer is allocated once, pushed into the stream, and from then on
//! only travels stream -> engine -> stream. The pool keeps the in-flight count
//! and refuses to push more buffers than it allocated.

use crate::traits::{Buffer, DeliveryStream, DeviceError, Result};
use std::time::Duration;
use tracing::debug;

/// Buffer pool driving one delivery stream.
pub struct BufferPool<S: DeliveryStream> {
    stream: S,
    capacity: usize,
    in_flight: usize,
    peak_in_flight: usize,
}

impl<S: DeliveryStream> BufferPool<S> {
    /// Allocate `capacity` buffers of `payload_size` bytes and push them all
    /// into `stream`.
    pub fn fill(stream: S, capacity: usize, payload_size: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DeviceError::InvalidParameter(
                "buffer pool capacity must be > 0".to_owned(),
            ));
        }

        let mut pool = Self {
            stream,
            capacity,
            in_flight: 0,
            peak_in_flight: 0,
        };

        for _ in 0..capacity {
            pool.push(Buffer::new(payload_size))?;
        }

        debug!(capacity, payload_size, "Buffer pool filled");
        Ok(pool)
    }

    /// Wait up to `timeout` for a completed buffer.
    pub fn pop(&mut self, timeout: Duration) -> Option<Buffer> {
        let buffer = self.stream.timeout_pop_buffer(timeout)?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(buffer)
    }

    /// Hand a popped buffer back to the stream.
    pub fn recycle(&mut self, mut buffer: Buffer) -> Result<()> {
        buffer.reset();
        self.push(buffer)
    }

    fn push(&mut self, buffer: Buffer) -> Result<()> {
        if self.in_flight >= self.capacity {
            return Err(DeviceError::StreamError(format!(
                "buffer pool overflow: {} buffers already in flight",
                self.in_flight
            )));
        }
        self.stream.push_buffer(buffer)?;
        self.in_flight += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
        Ok(())
    }

    /// The underlying stream.
    pub fn stream(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Number of buffers the pool allocated.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers currently held by the stream.
    pub const fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Highest in-flight count observed.
    pub const fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    /// Tear down the stream, releasing every buffer still in flight.
    pub fn teardown(self) {
        debug!(in_flight = self.in_flight, "Releasing buffer pool");
        self.stream.teardown();
    }
}
