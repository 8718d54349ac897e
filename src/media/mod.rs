//! Media side of the relay.
//!
//! ```text
//! Pipeline (ffmpeg-bus threads)
//!     │ EncodedBuffer
//!     ▼
//! PipelineBridge ──► video track ──┐
//!                └─► audio track ──┴─► every viewer session
//! ```

pub mod bridge;
pub mod clock;
pub mod origin;
