use serde::{Deserialize, Serialize};

/// Opaque 128-bit identifier for rows, chunks and tables.
///
/// Generated from a cryptographic random source to ensure global uniqueness
/// without coordination. The all-zero value is reserved as the invalid
/// sentinel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u128);

impl Id {
    /// Generates a new random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().as_u128())
    }

    /// The invalid sentinel (all zero bits).
    pub fn invalid() -> Self {
        Self(0)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Hex rendering, used for directory keys and log output.
    pub fn hex(&self) -> String {
        format!("{:032x}", self.0)
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::invalid()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short prefix is enough to tell ids apart in logs.
        write!(f, "{:.8}", self.hex())
    }
}
