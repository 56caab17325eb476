//! Native [RTCRtpTransceiver][1] and [RTCRtpSender][2] contracts.
//!
//! [1]: https://w3.org/TR/webrtc/#dom-rtcrtptransceiver
//! [2]: https://w3.org/TR/webrtc/#dom-rtcrtpsender

use std::rc::Rc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::media::MediaKind;

use super::{
    media_track::MediaStreamTrack, transceiver_direction::TransceiverDirection,
    Error,
};

/// Per-encoding parameters of an [`RtpSender`], one entry per simulcast
/// layer (or a single entry for unicast and SVC sending).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SendEncodingParameters {
    /// RTP stream ID of the encoding, when negotiated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,

    /// Whether the encoding is actively sent.
    pub active: bool,

    /// Cap on the bitrate of the encoding, in bits per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u64>,

    /// Factor the captured resolution is downscaled by for this encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,

    /// Scalability mode of the encoding (e.g. `L1T3`, `L3T3_KEY`), when the
    /// codec and the native stack support selecting one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
}

/// Hint to the native encoder on what to sacrifice under constrained
/// bandwidth or CPU.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationPreference {
    /// Degrade resolution to keep the frame rate.
    MaintainFramerate,

    /// Degrade frame rate to keep the resolution.
    MaintainResolution,

    /// Degrade both proportionally.
    Balanced,
}

/// Sender parameters, as handed to the native `setParameters` call.
///
/// Obtained via [`RtpSender::get_parameters()`], modified and written back
/// atomically: some native stacks invalidate their parameters transaction
/// on every call, so concurrent writes on one sender must never happen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SendParameters {
    /// Per-encoding parameters.
    pub encodings: Vec<SendEncodingParameters>,

    /// Degradation preference of the sender, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degradation_preference: Option<DegradationPreference>,
}

/// Handle to a native [RTCRtpSender][1].
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcrtpsender
#[async_trait(?Send)]
pub trait RtpSender {
    /// Replaces the track this sender transmits without renegotiation.
    ///
    /// # Errors
    ///
    /// Errors if the native stack rejects the replacement (e.g. on a kind
    /// mismatch).
    async fn replace_track(
        &self,
        with: Option<Rc<dyn MediaStreamTrack>>,
    ) -> Result<(), Error>;

    /// Returns the current parameters of this sender.
    fn get_parameters(&self) -> SendParameters;

    /// Writes the provided parameters to the native sender.
    ///
    /// # Errors
    ///
    /// Errors if the native stack refuses the parameters.
    async fn set_parameters(&self, params: SendParameters)
        -> Result<(), Error>;

    /// Re-wires the encoded-streams processor pipeline of this sender after
    /// a track replacement.
    ///
    /// No-op on stacks without insertable streams.
    fn rewire_encoded_streams(&self) {}
}

/// Handle to a native [RTCRtpTransceiver][1].
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcrtptransceiver
pub trait Transceiver {
    /// Returns the negotiated media description ID of this transceiver, if
    /// negotiation produced one already.
    fn mid(&self) -> Option<String>;

    /// Returns the media kind this transceiver carries.
    fn kind(&self) -> MediaKind;

    /// Returns the current preferred direction of this transceiver.
    fn direction(&self) -> TransceiverDirection;

    /// Changes the preferred direction of this transceiver.
    fn set_direction(&self, direction: TransceiverDirection);

    /// Returns the sender half of this transceiver.
    fn sender(&self) -> Rc<dyn RtpSender>;
}
