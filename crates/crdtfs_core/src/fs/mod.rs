//! Filesystem change notifications.
//!
//! The [`Document`](crate::Document) publishes a [`FileSystemEvent`] for every
//! visible change, whether it came from a local call or from a merged remote
//! operation. Observers register through a [`CallbackRegistry`].

mod callback_registry;
mod events;

pub use callback_registry::{CallbackRegistry, EventCallback, EventFilter, SubscriptionId};
pub use events::FileSystemEvent;
