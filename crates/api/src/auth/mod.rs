//! Authentication primitives.
//!
//! - [`jwt`]: HS256 bearer-token verification.

pub mod jwt;
