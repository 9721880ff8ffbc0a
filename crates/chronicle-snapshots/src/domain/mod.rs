//! Pure folding rules.

pub mod fold;
pub mod reducer;
