//! Promotion of a petition into a downstream record
//!
//! Order is fixed:
//!
//! 1. Halt check
//! 2. Budget consume for `(owner, cycle)`
//! 3. Downstream creation through [`DownstreamCreator`]
//! 4. Back-reference write on the petition (immutable once set)
//!
//! Budget is spent before anything downstream exists and is never refunded,
//! even when step 3 or 4 fails.

mod service;

pub use service::{DownstreamCreator, PromotionReceipt, PromotionRequest, PromotionService};
