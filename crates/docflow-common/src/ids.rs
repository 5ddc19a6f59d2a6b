//! Stable identity newtypes shared by every layer of the engine.
//!
//! Each id wraps a `u64` rather than an index into some backing `Vec`: tables,
//! rows, columns, and documents are owned by the caller's project, not by us
//! (§3 Lifecycle), so we never assume a dense/contiguous id space.

use std::fmt;

macro_rules! id_type {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

id_type!(TableId, "table#");
id_type!(ColumnId, "col#");
id_type!(RowId, "row#");
id_type!(DocumentId, "doc#");
id_type!(VariantId, "variant#");
