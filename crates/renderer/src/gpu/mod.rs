//! GPU bring-up and the two pass-chain implementations.

pub(crate) mod compile;
pub(crate) mod context;
pub(crate) mod fallback;
pub(crate) mod passes;
pub(crate) mod primary;
pub(crate) mod uniforms;
