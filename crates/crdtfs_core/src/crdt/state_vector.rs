//! State vectors: per-replica summary of integrated operations.

use std::collections::BTreeMap;

use super::clock::{OperationId, ReplicaId};
use super::encoding::{read_var_uint, write_var_uint};
use crate::error::{CrdtfsError, Result};

/// Highest integrated counter per replica.
///
/// Because operations from one replica are integrated strictly in the order
/// their author produced them, `get(r) == c` means every operation by `r`
/// with a counter `<= c` is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateVector {
    entries: BTreeMap<ReplicaId, u64>,
}

impl StateVector {
    /// An empty vector (a replica that has seen nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest integrated counter for `replica`, 0 if none.
    pub fn get(&self, replica: &ReplicaId) -> u64 {
        self.entries.get(replica).copied().unwrap_or(0)
    }

    /// Raise the entry for `replica` to at least `counter`.
    pub fn advance(&mut self, replica: ReplicaId, counter: u64) {
        let entry = self.entries.entry(replica).or_insert(0);
        if counter > *entry {
            *entry = counter;
        }
    }

    /// Whether the vector reflects the operation (or character) `id`.
    pub fn contains(&self, id: &OperationId) -> bool {
        self.get(&id.replica) >= id.counter
    }

    /// Iterate over (replica, counter) entries.
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, &u64)> {
        self.entries.iter()
    }

    /// Number of replicas tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no replica is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode as `varUint(count)` followed by `16 replica bytes + varUint(counter)` per entry.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.entries.len() * 20);
        write_var_uint(&mut buf, self.entries.len() as u64);
        for (replica, counter) in &self.entries {
            buf.extend_from_slice(replica.as_bytes());
            write_var_uint(&mut buf, *counter);
        }
        buf
    }

    /// Decode a vector produced by [`encode`](Self::encode).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let malformed = |what: &str| CrdtfsError::MalformedOperation(format!("state vector: {what}"));

        let (count, mut offset) = read_var_uint(data).ok_or_else(|| malformed("missing entry count"))?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let end = offset + 16;
            let bytes: [u8; 16] = data
                .get(offset..end)
                .and_then(|slice| slice.try_into().ok())
                .ok_or_else(|| malformed("truncated replica id"))?;
            let (counter, used) =
                read_var_uint(&data[end..]).ok_or_else(|| malformed("truncated counter"))?;
            entries.insert(ReplicaId::from_bytes(bytes), counter);
            offset = end + used;
        }
        if offset != data.len() {
            return Err(malformed("trailing bytes"));
        }
        Ok(Self { entries })
    }
}

impl FromIterator<(ReplicaId, u64)> for StateVector {
    fn from_iter<I: IntoIterator<Item = (ReplicaId, u64)>>(iter: I) -> Self {
        let mut sv = StateVector::new();
        for (replica, counter) in iter {
            sv.advance(replica, counter);
        }
        sv
    }
}
