use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical offset of a record in the hybrid log. Addresses grow
/// monotonically and are never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Address(u64);

impl Address {
    pub const INVALID: Address = Address(0);
    pub const FIRST_VALID: Address = Address(1);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub fn next(self) -> Address {
        Address(self.0 + 1)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Copy of a record header as observed by an operation.
///
/// `previous_address` links to the prior version of the same key and can be
/// fed to [`crate::Session::read_at_address`] to walk older versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordInfo {
    pub previous_address: Address,
    pub tombstone: bool,
    /// Superseded by a copy at a newer address. In-place updates skip it.
    pub sealed: bool,
    /// Allocated by an operation that lost the index publication race.
    pub invalid: bool,
}

impl RecordInfo {
    pub fn new(previous_address: Address) -> Self {
        Self {
            previous_address,
            ..Self::default()
        }
    }

    pub fn tombstone(previous_address: Address) -> Self {
        Self {
            previous_address,
            tombstone: true,
            ..Self::default()
        }
    }

    pub fn has_previous(&self) -> bool {
        self.previous_address.is_valid()
    }
}
