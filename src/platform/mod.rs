//! Contracts of the native layer this crate runs on top of.
//!
//! The core never talks to a WebRTC stack or a socket directly: the host
//! process implements the traits of this module and hands them in at
//! construction. Everything behind these seams (SDP generation, ICE, DTLS,
//! sockets, media capture) is out of this crate's scope.

mod media_track;
mod peer_connection;
mod rtc_stats;
mod transceiver;
mod transceiver_direction;
mod transport;

use std::{future::Future, rc::Rc, time::Duration};

use derive_more::{Display, From};
use tracerr::Traced;

#[doc(inline)]
pub use self::{
    media_track::MediaStreamTrack,
    peer_connection::{
        BundlePolicy, IceCandidate, IceConnectionState, IceServer,
        IceTransportPolicy, PeerConnectionState, RtcConfiguration,
        RtcPeerConnection, SdpType, SignalingState, TrackEvent,
    },
    rtc_stats::{
        CandidatePairStats, IceCandidateStats, InboundRtpStats,
        OutboundRtpStats, RtcStat,
    },
    transceiver::{
        DegradationPreference, RtpSender, SendEncodingParameters,
        SendParameters, Transceiver,
    },
    transceiver_direction::TransceiverDirection,
    transport::{
        BridgeTransport, BridgeTransportFactory, CloseFrame, TransportError,
        TransportState,
    },
};

/// Opaque error surfaced by the native layer.
///
/// Carried as the cause inside this crate's typed errors.
#[derive(Clone, Debug, Display, Eq, From, PartialEq)]
#[from(forward)]
pub struct Error(pub String);

/// Factory closure producing [`RtcPeerConnection`]s out of an
/// [`RtcConfiguration`].
pub type PeerConnectionFactory = Box<
    dyn Fn(
        RtcConfiguration,
    ) -> Result<Rc<dyn RtcPeerConnection>, Traced<Error>>,
>;

/// Spawns a new task on the current thread.
pub fn spawn<F>(task: F)
where
    F: Future<Output = ()> + 'static,
{
    drop(tokio::task::spawn_local(task));
}

/// [`Future`] which resolves after the provided [`Duration`].
///
/// [`Future`]: std::future::Future
pub async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await;
}
