//! The editor side of the Xenote frame bridge.
//!
//! [`MessageBridge`] exchanges document state with the hosting parent frame
//! over a [`Transport`]; it reports load results through an [`Emitter`] and
//! coalesces frequent staging calls with a [`Debouncer`].

pub mod bridge;
pub mod debounce;
pub mod emitter;
pub mod serializer;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use bridge::{BridgeOptions, EVENT_LOAD, EVENT_LOAD_ERROR, MessageBridge};
pub use debounce::Debouncer;
pub use emitter::{Emitter, Listener, Subscription};
pub use serializer::{DocumentSerializer, StorageSerializer, SvgExportOptions};
pub use transport::{ChannelTransport, Transport};

/// Lock a mutex, recovering the guard if a listener panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
