//! Status change notification for long-poll readers
//!
//! [`StatusChangeNotifier`] keeps a version per petition and wakes waiters when
//! it moves. [`StatusTokenCodec`] hands readers an opaque, signed
//! `(record, version, issued_at)` token to resume from.

mod registry;
mod token;

pub use registry::StatusChangeNotifier;
pub use token::{StatusToken, StatusTokenCodec};
