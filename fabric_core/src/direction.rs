//! The router's fixed port enumeration.
//!
//! Changing this order would change the serialization of a router's
//! multicast fanout and therefore its cycle-level observable behavior, so
//! it is pinned here rather than left to derive order.

/// One of the router's six ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// North.
    N = 0,
    /// East.
    E = 1,
    /// South.
    S = 2,
    /// West.
    W = 3,
    /// Global buffer.
    Glb = 4,
    /// Processing element.
    Pe = 5,
}

impl Direction {
    /// Number of ports on a router.
    pub const COUNT: usize = 6;

    /// All ports, in the fixed enum order fanout is serialized in.
    pub const ALL: [Direction; Self::COUNT] = [
        Direction::N,
        Direction::E,
        Direction::S,
        Direction::W,
        Direction::Glb,
        Direction::Pe,
    ];

    /// This port's index into a 6x6 [`fabric_common::MulticastConfig`].
    pub const fn index(self) -> usize {
        self as usize
    }
}
