//! Client-side core for SFU-based conferencing.
//!
//! The core negotiates media sessions against an SFU (and optionally one
//! peer-to-peer session against another participant), manages the
//! lifecycle of local and remote media sources on those sessions, and
//! maintains the bridge channel: an in-band JSON control channel for
//! bandwidth and participant-selection signalling.
//!
//! The native WebRTC stack, sockets and media capture are consumed
//! through the trait contracts of [`platform`]; session negotiation and
//! presence through [`signaling`].

#![allow(clippy::module_name_repetitions)]
#![deny(broken_intra_doc_links)]
#![cfg_attr(not(feature = "mockable"), warn(missing_docs))]
#![cfg_attr(feature = "mockable", allow(missing_docs))]

pub mod bridge;
pub mod media;
pub mod options;
pub mod peer;
pub mod platform;
pub mod rtc;
pub mod sdp;
pub mod signaling;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use argo_colibri_proto as proto;

#[doc(inline)]
pub use self::{
    bridge::{BridgeChannel, BridgeChannelState, BridgeError, BridgeEvent},
    media::MediaKind,
    options::RtcOptions,
    peer::{PeerConnection, PeerError, PeerEvent, PeerId},
    rtc::{BridgeInit, RtcEvent, RtcManager},
};
