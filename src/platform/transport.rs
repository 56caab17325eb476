//! Bridge channel transport contract.

use std::rc::Rc;

use derive_more::Display;
use futures::{future::LocalBoxFuture, stream::LocalBoxStream};
use tracerr::Traced;

/// WebSocket [close frame][1] observed on transport shutdown.
///
/// [1]: https://tools.ietf.org/html/rfc6455#section-5.5.1
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloseFrame {
    /// Close code of the frame. `1000` for data channel closes.
    pub code: u16,

    /// Human-readable close reason.
    pub reason: String,
}

/// [`BridgeTransport`] states.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportState {
    /// Socket has been created. The connection is not open yet.
    Connecting,

    /// The connection is open and ready to communicate.
    Open,

    /// The connection is in the process of closing.
    Closing,

    /// The connection is closed or couldn't be opened.
    ///
    /// [`CloseFrame`] is the reason of why the transport went into this
    /// [`TransportState`].
    Closed(CloseFrame),
}

impl TransportState {
    /// Returns `true` if socket can be closed.
    #[inline]
    #[must_use]
    pub fn can_close(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// Errors that may occur in a [`BridgeTransport`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum TransportError {
    /// Occurs when the socket cannot be created or connected.
    #[display(fmt = "Failed to establish connection: {}", _0)]
    EstablishFailed(super::Error),

    /// Occurs when a frame cannot be handed to the underlying socket.
    #[display(fmt = "Failed to send frame: {}", _0)]
    SendFailed(super::Error),

    /// Occurs when a frame is sent over a socket that is not open.
    #[display(fmt = "Underlying socket is not open")]
    ClosedSocket,
}

/// Message transport of the bridge channel.
///
/// One instance represents one underlying connection: either an SFU data
/// channel or one attempt's worth of a WebSocket. Reconnecting means
/// producing a fresh transport through a [`BridgeTransportFactory`].
#[cfg_attr(feature = "mockable", mockall::automock)]
pub trait BridgeTransport {
    /// Sends a serialized frame over this transport, best effort.
    ///
    /// # Errors
    ///
    /// Errors if the underlying socket refuses the frame.
    fn send(&self, frame: &str) -> Result<(), Traced<TransportError>>;

    /// Returns a [`LocalBoxStream`] of all frames received by this
    /// transport.
    fn on_message(&self) -> LocalBoxStream<'static, String>;

    /// Subscribes to this transport's [`TransportState`] changes.
    fn on_state_change(&self) -> LocalBoxStream<'static, TransportState>;

    /// Returns the current [`TransportState`] of this transport.
    fn state(&self) -> TransportState;

    /// Closes the underlying socket with the provided close frame.
    fn close(&self, code: u16, reason: &str);
}

/// Factory closure producing a connected [`BridgeTransport`] per
/// (re)connection attempt.
pub type BridgeTransportFactory = Box<
    dyn Fn() -> LocalBoxFuture<
        'static,
        Result<Rc<dyn BridgeTransport>, Traced<TransportError>>,
    >,
>;
