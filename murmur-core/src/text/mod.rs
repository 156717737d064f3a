//! Pure text transforms applied to the accumulated buffer before synthesis.
//!
//! ```text
//! accumulated text ──► narration::extract (narration mode only)
//!                  ──► markdown::normalize (optional)
//!                  ──► chunker::chunk ──► Vec<Segment>
//! ```
//!
//! Nothing in this module performs I/O or holds state between calls.

pub mod chunker;
pub mod markdown;
pub mod narration;

pub use chunker::{chunk, Segment};
pub use narration::NarrationMarkers;
