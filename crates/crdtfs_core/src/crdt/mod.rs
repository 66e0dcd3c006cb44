#![doc = include_str!(concat!(env!("OUT_DIR"), "/crdt_README.md"))]

mod clock;
mod encoding;
mod engine;
mod folders;
mod lww;
mod memory_storage;
mod operation;
mod session;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
mod sqlite_storage;
mod state_vector;
mod storage;
mod sync;
mod text;
mod transport;
mod types;

pub use clock::{LamportClock, MAX_COUNTER, OperationId, ReplicaId};
pub use engine::{AppliedResult, CrdtEngine, MAX_PENDING, Mutation};
pub use folders::FolderSet;
pub use lww::{FieldChange, FileMeta, LwwRegister};
pub use memory_storage::MemoryStorage;
pub use operation::{OpKind, Operation, decode_operations, encode_operations};
pub use session::{SyncSession, SyncStats};
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
pub use sqlite_storage::SqliteStorage;
pub use state_vector::StateVector;
pub use storage::{CrdtStorage, StorageResult};
pub use sync::{SyncMessage, SyncProtocol};
pub use text::RgaText;
pub use transport::{MemoryHub, MemoryTransport, PeerId, Transport, TransportEvent};
pub use types::{CrdtUpdate, FileId, FileMetaView, MetaField, NewFile, UpdateOrigin};
