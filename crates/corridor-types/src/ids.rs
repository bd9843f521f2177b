//! Type-safe identifier wrappers around plain integers.
//!
//! Every entity in the simulation has a strongly-typed ID to prevent
//! accidental mixing of identifiers at compile time. IDs are dense integers
//! rather than random UUIDs: particle ids are handed out in injection order
//! and feed the per-entity deterministic seeds, so two runs with the same
//! configuration must produce the same ids.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around an integer with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty)
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl $name {
            /// Return the inner integer value.
            pub const fn into_inner(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(id: $inner) -> Self {
                Self(id)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Row-major index of a cell in the square simulation grid.
    CellIndex(usize)
}

define_id! {
    /// Unique identifier of a truck-unit particle. Never reused within a run.
    ParticleId(u64)
}

define_id! {
    /// Index of a storage lot in the scenario's lot table.
    LotId(usize)
}

impl CellIndex {
    /// Return the index as a `usize` for slice access.
    pub const fn get(self) -> usize {
        self.0
    }
}

impl LotId {
    /// Return the index as a `usize` for slice access.
    pub const fn get(self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_by_inner_value() {
        assert!(ParticleId(3) < ParticleId(10));
        assert_eq!(CellIndex::from(7).get(), 7);
        assert_eq!(u64::from(ParticleId(9)), 9);
    }

    #[test]
    fn ids_display_as_plain_integers() {
        assert_eq!(LotId(2).to_string(), "2");
    }

    #[test]
    fn ids_serialize_transparently_as_tuple_structs() {
        let json = serde_json::to_string(&CellIndex(12)).unwrap_or_default();
        assert_eq!(json, "12");
    }
}
