//! Security policy for rago's local actions.
//!
//! The Command action hands its argument to the host shell verbatim, so
//! the only guard is the explicit allow-list enforced here.

pub mod allowlist;

pub use allowlist::{CommandPolicy, PolicyDecision};
