//! The Sync Endpoint: the page side of the sync.
//!
//! [`SyncEndpoint`] is the binding state machine for one text field.
//! [`client`] wraps it in a task that owns the websocket and keeps
//! reconnecting to the daemon.

pub mod client;
mod element;

use std::fmt;

use thiserror::Error;

use crate::protocol::{preview, SyncMessage};

pub use self::client::{
    spawn, ConnectionState, EndpointConfig, EndpointHandle, EndpointStatus, ReconnectTimer,
    TransportError, DEFAULT_RECONNECT_DELAY, DEFAULT_URL,
};
pub use self::element::{utf16_len, ElementIdentity, MemoryField, SelectionRange, TextField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindReason {
    /// The user cleared the binding.
    Explicit,
    /// The page is navigating away.
    Navigation,
    /// Another element is being bound in its place.
    Rebind,
}

impl fmt::Display for UnbindReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnbindReason::Explicit => "unbound by user",
            UnbindReason::Navigation => "page navigated away",
            UnbindReason::Rebind => "another element was selected",
        })
    }
}

/// What [`SyncEndpoint::on_remote_update`] did with a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    NotBound,
    /// The field already held this value. Nothing was touched.
    Unchanged,
    Applied,
}

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("{identity} is not a text field. Only <textarea> and <input type=\"text\"> can be synced.")]
    UnsupportedElement { identity: ElementIdentity },

    #[error("The endpoint has stopped")]
    Stopped,
}

/// Binding state for at most one text field.
pub struct SyncEndpoint<E> {
    bound: Option<E>,
}

impl<E> Default for SyncEndpoint<E> {
    fn default() -> Self {
        Self { bound: None }
    }
}

impl<E: TextField> SyncEndpoint<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn bound_identity(&self) -> Option<ElementIdentity> {
        self.bound.as_ref().map(TextField::identity)
    }

    /// Binds `element`, unbinding whatever was bound before. Returns the
    /// element's current value as the first outbound update.
    ///
    /// Anything that isn't a plain text field is refused and the existing
    /// binding is left alone.
    pub fn bind(&mut self, mut element: E) -> Result<SyncMessage, EndpointError> {
        let identity = element.identity();
        if !identity.is_text_field() {
            return Err(EndpointError::UnsupportedElement { identity });
        }

        self.unbind(UnbindReason::Rebind);

        element.attach();
        let value = element.value();
        log::info!("Bound to {}", identity);

        self.bound = Some(element);
        Ok(SyncMessage::update(value))
    }

    /// Returns whether anything was bound.
    pub fn unbind(&mut self, reason: UnbindReason) -> bool {
        match self.bound.take() {
            Some(mut element) => {
                element.detach();
                log::info!("Unbound {} ({})", element.identity(), reason);
                true
            }
            None => false,
        }
    }

    /// A genuine user edit. Every edit is forwarded as-is.
    pub fn on_local_edit(&mut self, value: String) -> Option<SyncMessage> {
        if self.bound.is_none() {
            log::trace!("Ignoring local edit with no element bound");
            return None;
        }

        Some(SyncMessage::update(value))
    }

    /// Applies content from the daemon.
    ///
    /// A value equal to the field's current one is not applied at all; that
    /// equality check is what stops an echo from bouncing back and forth.
    /// Otherwise the selection is kept as close to where it was as the new
    /// length allows, and listeners are told through
    /// [`TextField::notify_input`], which never produces an outbound message.
    pub fn on_remote_update(&mut self, value: &str) -> RemoteApply {
        let Some(element) = self.bound.as_mut() else {
            log::warn!("No element bound; skipping update from file");
            return RemoteApply::NotBound;
        };

        if element.value() == value {
            return RemoteApply::Unchanged;
        }

        log::debug!("Applying update from file: {}", preview(value));

        let selection = element.selection();
        element.set_value(value);
        element.set_selection(selection.clamp(utf16_len(value)));
        element.notify_input();

        RemoteApply::Applied
    }
}
