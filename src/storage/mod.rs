/*! Buffers the protocol engines are built on.

 * [RingBuffer] — a bounded circular queue with random access into both
   its allocated and not-yet-allocated regions, so the TCP engine can
   address bytes by sequence-number offset without copying them through
   the queue.
 * [NetBuffer] — an ordered sequence of chunks with reserved headroom,
   letting link-layer headers and tags be prepended in place.
*/

mod chunked;
mod ring_buffer;

pub use self::chunked::NetBuffer;
pub use self::ring_buffer::RingBuffer;

/// Error returned when enqueuing into a full buffer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Full;

/// Error returned when dequeuing from an empty buffer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Empty;
