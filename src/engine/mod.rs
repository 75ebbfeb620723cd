//! Native server engines the contexts adapt.
//!
//! Each engine is an opaque I/O provider with its own request and response
//! API; nothing in here knows about `Context`.

pub mod callback;
pub mod multipart;
pub mod stream;
