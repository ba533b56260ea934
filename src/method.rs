//! Direct method dispatch.
//!
//! An inbound invocation is handed to the registered handler, which either
//! answers on the spot or defers. Deferred invocations stay open until the
//! application calls `device_method_response` with the invocation's
//! [`MethodId`]. There is no response timeout; an invocation the application
//! never answers stays open on the transport.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use heapless::FnvIndexSet;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Maximum length of a method name.
pub const MAX_METHOD_NAME_LEN: usize = 128;

/// Maximum number of deferred invocations awaiting a response.
pub const MAX_OPEN_METHODS: usize = 16;

/// Status returned when no handler is registered.
pub const STATUS_NOT_IMPLEMENTED: u16 = 501;

/// Status returned when too many invocations are already open.
pub const STATUS_TOO_MANY_OPEN: u16 = 503;

/// Opaque transport handle correlating an invocation with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MethodId(pub u64);

/// A direct method call from the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInvocation {
    /// Transport correlation handle.
    pub method_id: MethodId,
    /// Method name.
    pub name: heapless::String<MAX_METHOD_NAME_LEN>,
    /// Request body.
    pub payload: Vec<u8>,
}

/// Handler verdict for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodReply {
    /// Answer now.
    Respond {
        /// Status code returned to the caller.
        status: u16,
        /// Response body.
        payload: Vec<u8>,
    },
    /// The application will answer later with `device_method_response`.
    Deferred,
}

/// Handler for direct method invocations.
pub type MethodCallback = Box<dyn FnMut(&MethodInvocation) -> MethodReply>;

/// Routes invocations to the handler and tracks open ones.
#[derive(Default)]
pub struct MethodDispatcher {
    handler: Option<MethodCallback>,
    open: FnvIndexSet<MethodId, MAX_OPEN_METHODS>,
}

impl MethodDispatcher {
    /// Creates a dispatcher with no handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or clears the handler.
    pub fn set_handler(&mut self, handler: Option<MethodCallback>) {
        self.handler = handler;
    }

    /// Whether a handler is registered.
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Handles one inbound invocation.
    pub fn dispatch<T: Transport + ?Sized>(&mut self, invocation: MethodInvocation, transport: &mut T) {
        let id = invocation.method_id;
        let Some(handler) = self.handler.as_mut() else {
            warn!("no handler for method {}", invocation.name.as_str());
            Self::send(transport, id, &[], STATUS_NOT_IMPLEMENTED);
            return;
        };
        if self.open.insert(id).is_err() {
            warn!("too many open method invocations, refusing {}", invocation.name.as_str());
            Self::send(transport, id, &[], STATUS_TOO_MANY_OPEN);
            return;
        }
        debug!("invoking method {}", invocation.name.as_str());
        match handler(&invocation) {
            MethodReply::Respond { status, payload } => {
                self.open.remove(&id);
                Self::send(transport, id, &payload, status);
            }
            MethodReply::Deferred => {}
        }
    }

    /// Completes an open invocation.
    ///
    /// Fails with [`Error::InvalidArgument`] if `id` is unknown or was already
    /// answered.
    pub fn respond<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        id: MethodId,
        payload: &[u8],
        status: u16,
    ) -> Result<()> {
        if !self.open.remove(&id) {
            return Err(Error::InvalidArgument);
        }
        transport
            .send_method_response(id, payload, status)
            .map_err(Error::Transport)
    }

    fn send<T: Transport + ?Sized>(transport: &mut T, id: MethodId, payload: &[u8], status: u16) {
        if let Err(err) = transport.send_method_response(id, payload, status) {
            error!("method response {} failed: {}", id, err);
        }
    }
}

impl fmt::Debug for MethodDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDispatcher")
            .field("has_handler", &self.handler.is_some())
            .field("open", &self.open.len())
            .finish()
    }
}
