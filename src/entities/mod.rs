//! Audio entity management
//!
//! Sources produce audio, sinks consume it. The [`EntityRegistry`] owns the
//! canonical uuid→source and uuid→sink maps for this process.

pub mod registry;
pub mod sink;
pub mod source;

pub use registry::EntityRegistry;
pub use sink::Sink;
pub use source::Source;
