//! Default scalar instantiations for [`crate::ProcessingElement`] and
//! [`crate::PeCluster`].
//!
//! Both types are generic over their activation/weight and accumulator
//! types; nothing in this crate requires these particular widths. They
//! exist so an embedder who does not care about picking widths has a
//! reasonable default to reach for, matching `§4.4`'s "default is 8-bit
//! operands with a psum wide enough to hold KW·W·KH products" note.
//!
//! Overflow on the narrower alias is a `debug_assert`-style panic in debug
//! builds and silent wraparound in release builds, the same behavior plain
//! `i8`/`i32` arithmetic has everywhere else in Rust — this crate does not
//! impose saturating or explicitly-wrapping arithmetic on top of that.

/// Default activation/weight scalar type.
pub type DefaultIact = i8;

/// Default partial-sum accumulator type, wide enough to hold
/// `MAX_KERNEL_EXTENT`-many `i8 x i8` products without overflowing for any
/// realistic kernel size.
pub type DefaultPsum = i32;

/// A [`crate::ProcessingElement`] instantiated at the default scalar widths.
pub type DefaultPe = crate::ProcessingElement<DefaultIact, DefaultPsum>;

/// A [`crate::PeCluster`] instantiated at the default scalar widths.
pub type DefaultCluster = crate::PeCluster<DefaultIact, DefaultPsum>;
