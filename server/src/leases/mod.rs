//! Durable lease metadata.
//!
//! A lease row records where a shared file's bytes live, how many downloads
//! remain, and when the share expires. The row is the single source of truth
//! for eligibility; `decrement_and_get` is the one serialization point for
//! concurrent downloads of the same token.

pub mod registry;

pub use registry::{Decrement, LeaseRegistry};
