//! Replica identity and logical clock.
//!
//! Every mutation is tagged with an [`OperationId`]: the pair of the
//! authoring [`ReplicaId`] and a Lamport counter. Ids are totally ordered by
//! counter first and replica second, which is the tie-break every LWW
//! register and every concurrent text insertion relies on.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CrdtfsError;

/// Unique identifier of one participating process/session.
///
/// A random 128-bit value; collisions are negligible for any realistic
/// number of peers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(Uuid);

impl ReplicaId {
    /// Generate a fresh random replica id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build a replica id from raw bytes (wire decoding, tests).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps test failures readable
        let s = self.0.simple().to_string();
        write!(f, "ReplicaId({})", &s[..8])
    }
}

impl FromStr for ReplicaId {
    type Err = CrdtfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CrdtfsError::MalformedOperation(format!("invalid replica id '{s}': {e}")))
    }
}

/// Highest counter an operation may occupy.
///
/// Kept within `i64` so counters survive storage backends with signed
/// integers, and far enough below `u64::MAX` that arithmetic on ids never
/// overflows.
pub const MAX_COUNTER: u64 = i64::MAX as u64;

/// Globally unique, totally ordered operation tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId {
    /// Lamport counter.
    pub counter: u64,
    /// Authoring replica.
    pub replica: ReplicaId,
}

impl OperationId {
    /// Create an operation id.
    pub fn new(replica: ReplicaId, counter: u64) -> Self {
        Self { counter, replica }
    }

    /// The id `offset` counters after this one, from the same replica.
    ///
    /// Multi-character insertions reserve a contiguous counter block; the
    /// character at offset `i` is identified by `id.offset(i)`.
    pub fn offset(&self, offset: u64) -> Self {
        Self {
            counter: self.counter + offset,
            replica: self.replica,
        }
    }
}

impl PartialOrd for OperationId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OperationId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.replica.cmp(&other.replica))
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.replica)
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:?}", self.counter, self.replica)
    }
}

/// Per-replica Lamport clock.
///
/// `next` never repeats a value. `observe` pulls the clock past counters seen
/// on remote operations so that an operation generated after observing
/// another always carries a larger id.
#[derive(Debug, Clone)]
pub struct LamportClock {
    replica: ReplicaId,
    counter: u64,
}

impl LamportClock {
    /// A clock starting at zero; the first id handed out has counter 1.
    pub fn new(replica: ReplicaId) -> Self {
        Self {
            replica,
            counter: 0,
        }
    }

    /// The replica this clock stamps ids for.
    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    /// The last counter handed out or observed.
    pub fn current(&self) -> u64 {
        self.counter
    }

    /// Hand out the next operation id.
    pub fn next(&mut self) -> Result<OperationId, CrdtfsError> {
        self.reserve(1)
    }

    /// Reserve `count` consecutive counters and return the id of the first.
    ///
    /// `count` of zero is treated as one so the returned id is always fresh.
    /// Fails with `ClockExhausted` instead of passing [`MAX_COUNTER`]; the
    /// clock is left unchanged.
    pub fn reserve(&mut self, count: u64) -> Result<OperationId, CrdtfsError> {
        let first = self.counter + 1;
        let last = self
            .counter
            .checked_add(count.max(1))
            .filter(|last| *last <= MAX_COUNTER)
            .ok_or_else(|| {
                CrdtfsError::ClockExhausted(format!(
                    "cannot reserve {} counters after {}",
                    count, self.counter
                ))
            })?;
        self.counter = last;
        Ok(OperationId::new(self.replica, first))
    }

    /// Advance past a counter observed elsewhere (remote op or persisted log).
    ///
    /// Counters above [`MAX_COUNTER`] are clamped to it.
    pub fn observe(&mut self, counter: u64) {
        let counter = counter.min(MAX_COUNTER);
        if counter > self.counter {
            self.counter = counter;
        }
    }
}
