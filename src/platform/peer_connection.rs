//! Native [RTCPeerConnection][1] contract.
//!
//! [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface

use std::rc::Rc;

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::media::MediaKind;

use super::{
    media_track::MediaStreamTrack, rtc_stats::RtcStat,
    transceiver::Transceiver, transceiver_direction::TransceiverDirection,
    Error,
};

/// [RTCIceServer][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#rtciceserver-dictionary
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    /// URLs of this server.
    pub urls: Vec<String>,

    /// Username for authentication, if required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for authentication, if required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// [RTCIceTransportPolicy][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcicetransportpolicy
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IceTransportPolicy {
    /// Any type of candidate may be used.
    All,

    /// Only media relayed through a TURN server may be used.
    Relay,
}

/// [RTCBundlePolicy][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcbundlepolicy
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BundlePolicy {
    /// Bundle all media onto one transport.
    MaxBundle,

    /// Gather candidates per media type.
    Balanced,

    /// Gather candidates per m-line.
    MaxCompat,
}

/// Configuration of a native peer connection.
///
/// The core always bundles all media over a single transport; relayed-only
/// ICE and insertable streams are opt-in.
#[derive(Clone, Debug)]
pub struct RtcConfiguration {
    /// ICE servers the native stack gathers candidates against.
    pub ice_servers: Vec<IceServer>,

    /// Bundling policy; always [`BundlePolicy::MaxBundle`] in this core.
    pub bundle_policy: BundlePolicy,

    /// Candidate policy; [`IceTransportPolicy::Relay`] when TURN relaying is
    /// forced.
    pub ice_transport_policy: IceTransportPolicy,

    /// Whether senders and receivers expose encoded frames to the
    /// application.
    pub encoded_insertable_streams: bool,
}

/// [RTCSignalingState][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcsignalingstate
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum SignalingState {
    /// No offer/answer exchange in progress.
    #[display(fmt = "stable")]
    Stable,

    /// A local offer has been applied.
    #[display(fmt = "have-local-offer")]
    HaveLocalOffer,

    /// A remote offer has been applied.
    #[display(fmt = "have-remote-offer")]
    HaveRemoteOffer,

    /// A local provisional answer has been applied.
    #[display(fmt = "have-local-pranswer")]
    HaveLocalPranswer,

    /// A remote provisional answer has been applied.
    #[display(fmt = "have-remote-pranswer")]
    HaveRemotePranswer,

    /// The connection is closed.
    #[display(fmt = "closed")]
    Closed,
}

/// [ICE connection state][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#dfn-ice-connection-state
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum IceConnectionState {
    /// Gathering has not produced a checkable pair yet.
    New,

    /// Candidate pairs are being checked.
    Checking,

    /// A usable pair has been found.
    Connected,

    /// Checking finished and a pair is in use.
    Completed,

    /// No usable pair could be found.
    Failed,

    /// A previously usable pair no longer works.
    Disconnected,

    /// ICE is shut down.
    Closed,
}

/// [RTCPeerConnectionState][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcpeerconnectionstate
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum PeerConnectionState {
    /// Any of the transports are new.
    New,

    /// Any of the transports are connecting.
    Connecting,

    /// All transports are connected.
    Connected,

    /// Any of the transports are disconnected.
    Disconnected,

    /// Any of the transports are failed.
    Failed,

    /// The connection is closed.
    Closed,
}

/// [RTCIceCandidate][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#rtcicecandidate-interface
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IceCandidate {
    /// [`candidate` field][1] of the discovered candidate.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-candidate
    pub candidate: String,

    /// Index of the m-line the candidate is associated with.
    pub sdp_m_line_index: Option<u16>,

    /// Media description ID the candidate is associated with.
    pub sdp_mid: Option<String>,
}

/// Representation of [RTCSdpType] with its SDP payload.
///
/// [RTCSdpType]: https://w3.org/TR/webrtc/#dom-rtcsdptype
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SdpType {
    /// [`offer` type][1] of SDP.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-offer
    Offer(String),

    /// [`answer` type][1] of SDP.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-answer
    Answer(String),
}

impl SdpType {
    /// Returns the SDP text this [`SdpType`] carries.
    #[inline]
    #[must_use]
    pub fn sdp(&self) -> &str {
        match self {
            Self::Offer(sdp) | Self::Answer(sdp) => sdp,
        }
    }
}

/// Native [`track` event][1] payload.
///
/// [1]: https://w3.org/TR/webrtc/#event-track
pub struct TrackEvent {
    /// The received track.
    pub track: Rc<dyn MediaStreamTrack>,

    /// IDs of the streams the track was announced on.
    pub stream_ids: Vec<String>,

    /// Transceiver the track arrived over.
    pub transceiver: Rc<dyn Transceiver>,
}

/// Handle to a native [RTCPeerConnection][1].
///
/// Event handlers are single-slot callbacks, mirroring the native `onX`
/// fields; fan-out to multiple observers happens above this seam.
///
/// [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface
#[async_trait(?Send)]
pub trait RtcPeerConnection {
    /// Obtains an SDP offer from the native stack.
    ///
    /// The offer carries the ICE-restart constraint when `ice_restart` is
    /// set.
    ///
    /// # Errors
    ///
    /// Errors if the native `createOffer` fails.
    async fn create_offer(&self, ice_restart: bool) -> Result<String, Error>;

    /// Obtains an SDP answer from the native stack.
    ///
    /// # Errors
    ///
    /// Errors if the native `createAnswer` fails.
    async fn create_answer(&self) -> Result<String, Error>;

    /// Applies the provided SDP as the local description.
    ///
    /// # Errors
    ///
    /// Errors if the native `setLocalDescription` fails.
    async fn set_local_description(&self, sdp: SdpType) -> Result<(), Error>;

    /// Applies the provided SDP as the remote description.
    ///
    /// # Errors
    ///
    /// Errors if the native `setRemoteDescription` fails.
    async fn set_remote_description(&self, sdp: SdpType) -> Result<(), Error>;

    /// Adds a remote ICE candidate to this connection.
    ///
    /// # Errors
    ///
    /// Errors if the native `addIceCandidate` fails.
    async fn add_ice_candidate(
        &self,
        candidate: &IceCandidate,
    ) -> Result<(), Error>;

    /// Returns the current signaling state of this connection.
    fn signaling_state(&self) -> SignalingState;

    /// Returns the current ICE connection state of this connection.
    fn ice_connection_state(&self) -> IceConnectionState;

    /// Returns the current aggregate connection state, when the native
    /// stack reports one.
    fn connection_state(&self) -> Option<PeerConnectionState>;

    /// Creates a new transceiver of the given kind and direction.
    fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: TransceiverDirection,
    ) -> Rc<dyn Transceiver>;

    /// Returns all transceivers of this connection, in creation order.
    fn transceivers(&self) -> Vec<Rc<dyn Transceiver>>;

    /// Looks up a transceiver by its negotiated `mid`.
    fn transceiver_by_mid(&self, mid: &str) -> Option<Rc<dyn Transceiver>>;

    /// Polls the native statistics of this connection.
    ///
    /// # Errors
    ///
    /// Errors if the native `getStats` fails.
    async fn get_stats(&self) -> Result<Vec<RtcStat>, Error>;

    /// Indicates whether the native stack honors per-encoding `active`
    /// flags in sender parameters.
    ///
    /// Probed once per connection; stacks answering `false` get their
    /// transmission paused via transceiver direction changes instead.
    fn supports_per_encoding_activation(&self) -> bool;

    /// Indicates whether the native stack supports selecting scalability
    /// modes through sender parameters.
    fn supports_scalability_mode(&self) -> bool;

    /// Indicates whether the native stack honors the `usedtx` Opus
    /// parameter when sending.
    fn honors_opus_dtx(&self) -> bool;

    /// Sets the handler for the native `track` event.
    fn on_track(&self, f: Option<Box<dyn FnMut(TrackEvent)>>);

    /// Sets the handler invoked when a remote track leaves one of this
    /// connection's streams, with `(stream_id, track_id)`.
    fn on_remove_track(&self, f: Option<Box<dyn FnMut(String, String)>>);

    /// Sets the handler for discovered ICE candidates.
    fn on_ice_candidate(&self, f: Option<Box<dyn FnMut(IceCandidate)>>);

    /// Sets the handler for ICE connection state changes.
    fn on_ice_connection_state_change(
        &self,
        f: Option<Box<dyn FnMut(IceConnectionState)>>,
    );

    /// Sets the handler for aggregate connection state changes.
    fn on_connection_state_change(
        &self,
        f: Option<Box<dyn FnMut(PeerConnectionState)>>,
    );

    /// Closes the underlying native connection.
    fn close(&self);
}
