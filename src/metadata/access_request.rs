//! [`AccessRequest`] --- a non-owner's petition for access to a file (§4.5).

use std::time::SystemTime;

/// Access type requested, encoded on the wire as `flags` (§6): `1` = Read,
/// `2` = Write, `3` = ReadWrite. Unlike `ADD_ACCESS`'s bitmask, this is a
/// direct enumeration --- there is no "flags & 2 implies flags & 1" folding
/// here because all three values are spelled out explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    ReadWrite,
}

impl AccessType {
    pub fn from_flags(flags: u32) -> Option<Self> {
        match flags {
            1 => Some(AccessType::Read),
            2 => Some(AccessType::Write),
            3 => Some(AccessType::ReadWrite),
            _ => None,
        }
    }

    /// The `(read, write)` ACL grant an approval derives (§4.5).
    pub fn derived_rw(self) -> (bool, bool) {
        match self {
            AccessType::Read => (true, false),
            AccessType::Write => (false, true),
            AccessType::ReadWrite => (true, true),
        }
    }
}

/// Lifecycle state of an [`AccessRequest`]. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

/// A non-owner's petition for access to a file.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub id: u64,
    pub requester: String,
    pub access_type: AccessType,
    pub requested_at: SystemTime,
    pub status: RequestStatus,
}
