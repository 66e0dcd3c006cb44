//! Sync protocol: state-vector handshake plus operation deltas.
//!
//! # Protocol Overview
//!
//! Synchronization uses a two-phase handshake:
//!
//! 1. **SyncStep1**: a peer sends its state vector
//! 2. **SyncStep2**: the other side answers with every operation that
//!    vector does not reflect, followed by its own SyncStep1
//! 3. The initiator answers that SyncStep1 with a SyncStep2 alone, which
//!    ends the exchange
//!
//! After the handshake, local operations are broadcast as **Update**
//! messages. Merging is idempotent and order-insensitive, so duplicated or
//! reordered messages are harmless and an interrupted exchange can simply
//! be restarted.
//!
//! # Wire Format
//!
//! Messages use varUint encoding (variable-length unsigned integers):
//! - `varUint(0)`: Sync message type
//!   - `varUint(0)`: SyncStep1, payload is an encoded [`StateVector`]
//!   - `varUint(1)`: SyncStep2, payload is an encoded operation batch
//!   - `varUint(2)`: Update, payload is an encoded operation batch
//! - any other message type (awareness, auth) is ignored
//!
//! Payloads are encoded as `varUint(length) + raw bytes`; several sync
//! sub-messages may follow one message type.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use crdtfs_core::{Document, FilesystemConfig, NewFile};
//! use crdtfs_core::crdt::{MemoryStorage, SyncProtocol};
//!
//! let open = || Document::open(FilesystemConfig::new("room"), Arc::new(MemoryStorage::new()));
//! let (mut a, mut b) = (open()?, open()?);
//! a.create_file(NewFile::named("a.txt"))?;
//!
//! let step1 = SyncProtocol::new(&mut b).create_sync_step1();
//! let reply = SyncProtocol::new(&mut a).handle_message(&step1)?.unwrap();
//! SyncProtocol::new(&mut b).handle_message(&reply)?;
//!
//! assert!(b.get_file_id("a.txt").is_ok());
//! # Ok::<(), crdtfs_core::CrdtfsError>(())
//! ```

use super::encoding::{read_var_byte_array, read_var_uint, write_var_byte_array, write_var_uint};
use super::operation::{Operation, encode_operations};
use super::state_vector::StateVector;
use super::storage::StorageResult;
use super::types::UpdateOrigin;
use crate::document::Document;
use crate::error::CrdtfsError;

/// Message type bytes.
mod msg_type {
    /// Sync message (SyncStep1, SyncStep2, Update)
    pub const SYNC: u64 = 0;
}

/// Sync sub-message types.
mod sync_type {
    /// SyncStep1: state vector exchange
    pub const STEP1: u64 = 0;
    /// SyncStep2: missing operations
    pub const STEP2: u64 = 1;
    /// Update: incremental operations
    pub const UPDATE: u64 = 2;
}

/// Sync message types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// SyncStep1 contains an encoded state vector
    SyncStep1(Vec<u8>),
    /// SyncStep2 contains the operations the receiver is missing
    SyncStep2(Vec<u8>),
    /// Update contains newly produced operations
    Update(Vec<u8>),
}

impl SyncMessage {
    fn sync_type(&self) -> u64 {
        match self {
            SyncMessage::SyncStep1(_) => sync_type::STEP1,
            SyncMessage::SyncStep2(_) => sync_type::STEP2,
            SyncMessage::Update(_) => sync_type::UPDATE,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            SyncMessage::SyncStep1(p) | SyncMessage::SyncStep2(p) | SyncMessage::Update(p) => p,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SyncMessage::SyncStep1(_) => "SyncStep1",
            SyncMessage::SyncStep2(_) => "SyncStep2",
            SyncMessage::Update(_) => "Update",
        }
    }

    /// Encode the message.
    /// Format: varUint(msgType) + varUint(syncType) + varByteArray(payload)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_var_uint(&mut buf, msg_type::SYNC);
        self.encode_sub_message(&mut buf);
        buf
    }

    fn encode_sub_message(&self, buf: &mut Vec<u8>) {
        let payload = self.payload();
        log::debug!("[sync] Encoding {}, {} bytes", self.name(), payload.len());
        buf.reserve(payload.len() + 6);
        write_var_uint(buf, self.sync_type());
        write_var_byte_array(buf, payload);
    }

    /// Encode several sub-messages behind one message type.
    pub fn encode_all(messages: &[SyncMessage]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_var_uint(&mut buf, msg_type::SYNC);
        for message in messages {
            message.encode_sub_message(&mut buf);
        }
        buf
    }

    /// Decode every sub-message of a sync message.
    ///
    /// Empty input and non-sync message types yield an empty list. A
    /// truncated trailing sub-message is dropped; an unknown sync type is an
    /// error.
    pub fn decode_all(data: &[u8]) -> StorageResult<Vec<Self>> {
        let mut messages = Vec::new();

        let Some((msg_type_val, mut offset)) = read_var_uint(data) else {
            return Ok(messages);
        };
        if msg_type_val != msg_type::SYNC {
            log::debug!("[sync] Ignoring non-sync message type {}", msg_type_val);
            return Ok(messages);
        }

        while offset < data.len() {
            let Some((sync_type_val, type_bytes)) = read_var_uint(&data[offset..]) else {
                log::debug!("[sync] Incomplete sync type");
                break;
            };
            let Some((payload, payload_bytes)) =
                read_var_byte_array(&data[offset + type_bytes..])
            else {
                log::debug!("[sync] Incomplete payload");
                break;
            };

            let message = match sync_type_val {
                sync_type::STEP1 => SyncMessage::SyncStep1(payload),
                sync_type::STEP2 => SyncMessage::SyncStep2(payload),
                sync_type::UPDATE => SyncMessage::Update(payload),
                other => {
                    return Err(CrdtfsError::MalformedOperation(format!(
                        "unknown sync type {}",
                        other
                    )));
                }
            };
            log::debug!(
                "[sync] Decoded {} with payload {} bytes",
                message.name(),
                message.payload().len()
            );
            messages.push(message);
            offset += type_bytes + payload_bytes;
        }

        Ok(messages)
    }

    /// Decode the first sub-message, if any.
    pub fn decode(data: &[u8]) -> StorageResult<Option<Self>> {
        Ok(Self::decode_all(data)?.into_iter().next())
    }
}

/// Sync protocol handler bound to one document.
///
/// Holds no state of its own; every call reads or merges into the borrowed
/// [`Document`].
pub struct SyncProtocol<'a> {
    doc: &'a mut Document,
}

impl<'a> SyncProtocol<'a> {
    /// Create a protocol handler for `doc`.
    pub fn new(doc: &'a mut Document) -> Self {
        Self { doc }
    }

    /// Create a SyncStep1 message containing the local state vector.
    pub fn create_sync_step1(&self) -> Vec<u8> {
        SyncMessage::SyncStep1(self.doc.state_vector().encode()).encode()
    }

    /// Create a SyncStep2 message with the operations a peer at
    /// `remote_state_vector` is missing.
    pub fn create_sync_step2(&self, remote_state_vector: &[u8]) -> StorageResult<Vec<u8>> {
        let remote = StateVector::decode(remote_state_vector)?;
        let missing = self.doc.operations_since(&remote);
        log::debug!("[sync] Peer is missing {} operations", missing.len());
        Ok(SyncMessage::SyncStep2(encode_operations(&missing)?).encode())
    }

    /// Create an Update message carrying `ops`.
    pub fn create_update_message(&self, ops: &[Operation]) -> StorageResult<Vec<u8>> {
        Ok(SyncMessage::Update(encode_operations(ops)?).encode())
    }

    /// Handle an incoming message from a peer.
    ///
    /// Returns the response to send back, if any.
    ///
    /// # Message Types
    ///
    /// - **SyncStep1**: answered with SyncStep2, followed by our own
    ///   SyncStep1 unless the message already carried a SyncStep2
    /// - **SyncStep2**: merged, no response
    /// - **Update**: merged, no response
    ///
    /// A sub-message that fails (for instance because storage refused the
    /// merged batch) does not stop the others. The response is still
    /// returned; the first error is only reported when there is nothing to
    /// send back.
    pub fn handle_message(&mut self, msg: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let messages = SyncMessage::decode_all(msg)?;
        let is_reply = messages
            .iter()
            .any(|m| matches!(m, SyncMessage::SyncStep2(_)));
        let mut response: Vec<SyncMessage> = Vec::new();
        let mut first_error = None;

        for message in messages {
            if let Err(e) = self.handle_one(message, is_reply, &mut response) {
                log::warn!("[sync] Failed to handle sync message: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) if response.is_empty() => Err(e),
            _ if response.is_empty() => Ok(None),
            _ => Ok(Some(SyncMessage::encode_all(&response))),
        }
    }

    fn handle_one(
        &mut self,
        message: SyncMessage,
        is_reply: bool,
        response: &mut Vec<SyncMessage>,
    ) -> StorageResult<()> {
        match message {
            SyncMessage::SyncStep1(remote_sv) => {
                let remote = StateVector::decode(&remote_sv)?;
                let missing = self.doc.operations_since(&remote);
                response.push(SyncMessage::SyncStep2(encode_operations(&missing)?));
                if !is_reply {
                    response.push(SyncMessage::SyncStep1(self.doc.state_vector().encode()));
                }
            }
            SyncMessage::SyncStep2(update) => {
                let summary = self.doc.apply_update(&update, UpdateOrigin::Sync)?;
                log::debug!("[sync] Applied SyncStep2: {:?}", summary);
            }
            SyncMessage::Update(update) => {
                let summary = self.doc.apply_update(&update, UpdateOrigin::Remote)?;
                log::debug!("[sync] Applied Update: {:?}", summary);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SyncProtocol<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncProtocol")
            .field("doc", &self.doc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::NewFile;
    use std::sync::Arc;

    use crate::config::FilesystemConfig;
    use crate::test_utils::{FailingStorage, new_document};

    #[test]
    fn test_sync_message_encode_decode() {
        let msg = SyncMessage::Update(vec![1, 2, 3]);
        let encoded = msg.encode();
        assert_eq!(encoded, vec![0, 2, 3, 1, 2, 3]);
        assert_eq!(SyncMessage::decode(&encoded).unwrap(), Some(msg));
    }

    #[test]
    fn test_decode_combined_message() {
        let combined = SyncMessage::encode_all(&[
            SyncMessage::SyncStep2(vec![9]),
            SyncMessage::SyncStep1(vec![0]),
        ]);
        let decoded = SyncMessage::decode_all(&combined).unwrap();
        assert_eq!(
            decoded,
            vec![SyncMessage::SyncStep2(vec![9]), SyncMessage::SyncStep1(vec![0])]
        );
    }

    #[test]
    fn test_non_sync_and_empty_messages_ignored() {
        assert!(SyncMessage::decode_all(&[]).unwrap().is_empty());
        // Awareness message
        assert!(SyncMessage::decode_all(&[1, 3, 1, 2, 3]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_payload_dropped() {
        // Claims 5 payload bytes, carries 1
        assert!(SyncMessage::decode_all(&[0, 2, 5, 1]).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_sync_type_is_error() {
        assert!(SyncMessage::decode_all(&[0, 7, 0]).is_err());
    }

    #[test]
    fn test_full_handshake() {
        let mut a = new_document("room");
        let mut b = new_document("room");
        a.create_file(NewFile::named("from-a.txt").with_content("A"))
            .unwrap();
        b.create_file(NewFile::named("from-b.txt")).unwrap();

        let step1 = SyncProtocol::new(&mut b).create_sync_step1();
        let reply = SyncProtocol::new(&mut a)
            .handle_message(&step1)
            .unwrap()
            .unwrap();
        let back = SyncProtocol::new(&mut b)
            .handle_message(&reply)
            .unwrap()
            .unwrap();
        let done = SyncProtocol::new(&mut a).handle_message(&back).unwrap();

        assert_eq!(
            SyncMessage::decode_all(&back).unwrap().len(),
            1,
            "a reply is answered with SyncStep2 only"
        );
        assert!(done.is_none());
        assert_eq!(a.state_vector(), b.state_vector());
        assert_eq!(a.get_file_list(None), b.get_file_list(None));
        assert_eq!(b.get_file_content("from-a.txt").unwrap().text(), "A");
    }

    #[test]
    fn test_update_message_applies() {
        let mut a = new_document("room");
        let mut b = new_document("room");
        a.create_file(NewFile::named("x")).unwrap();
        let ops = a.take_outgoing();

        let msg = SyncProtocol::new(&mut a)
            .create_update_message(&ops)
            .unwrap();
        assert!(SyncProtocol::new(&mut b).handle_message(&msg).unwrap().is_none());
        assert!(b.get_file_id("x").is_ok());
    }

    #[test]
    fn test_step2_for_peer_that_has_everything_is_empty() {
        let mut a = new_document("room");
        a.create_file(NewFile::named("x")).unwrap();
        let sv = a.state_vector().encode();
        let step2 = SyncProtocol::new(&mut a).create_sync_step2(&sv).unwrap();
        assert_eq!(
            SyncMessage::decode(&step2).unwrap(),
            Some(SyncMessage::SyncStep2(b"[]".to_vec()))
        );
    }

    #[test]
    fn test_reply_survives_storage_failure() {
        let mut a = new_document("room");
        let storage = Arc::new(FailingStorage::new());
        let mut b = Document::open(FilesystemConfig::new("room"), storage.clone()).unwrap();
        a.create_file(NewFile::named("from-a.txt")).unwrap();
        b.create_file(NewFile::named("from-b.txt")).unwrap();

        let step1 = SyncProtocol::new(&mut b).create_sync_step1();
        let reply = SyncProtocol::new(&mut a)
            .handle_message(&step1)
            .unwrap()
            .unwrap();

        // Merging a's SyncStep2 fails to persist; a's SyncStep1 still gets answered
        storage.set_failing(true);
        let back = SyncProtocol::new(&mut b)
            .handle_message(&reply)
            .unwrap()
            .unwrap();
        assert!(matches!(
            SyncMessage::decode_all(&back).unwrap().as_slice(),
            [SyncMessage::SyncStep2(_)]
        ));
        assert!(b.get_file_id("from-a.txt").is_ok());
        assert_eq!(b.unsaved_count(), 1);

        SyncProtocol::new(&mut a).handle_message(&back).unwrap();
        assert!(a.get_file_id("from-b.txt").is_ok());
    }

    #[test]
    fn test_failed_update_without_response_is_error() {
        let mut a = new_document("room");
        let storage = Arc::new(FailingStorage::new());
        let mut b = Document::open(FilesystemConfig::new("room"), storage.clone()).unwrap();
        a.create_file(NewFile::named("x")).unwrap();
        let ops = a.take_outgoing();
        let msg = SyncProtocol::new(&mut a)
            .create_update_message(&ops)
            .unwrap();

        storage.set_failing(true);
        assert!(matches!(
            SyncProtocol::new(&mut b).handle_message(&msg),
            Err(CrdtfsError::PersistenceFailure(_))
        ));
        assert!(b.get_file_id("x").is_ok());
    }
}
