//! Internal utility helpers for lenient serde shapes.

pub(crate) mod serde;
