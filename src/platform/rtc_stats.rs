//! Typed subset of [RTCStats][1] entries the core consumes.
//!
//! The host adapts whatever its native `getStats` returns into these
//! entries; everything the normalizer does not need stays behind
//! [`RtcStat::Other`].
//!
//! [1]: https://w3.org/TR/webrtc-stats/

use serde::{Deserialize, Serialize};

/// One entry of a native stats report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RtcStat {
    /// [`inbound-rtp`][1] entry.
    ///
    /// [1]: https://w3.org/TR/webrtc-stats/#dom-rtcstatstype-inbound-rtp
    InboundRtp(InboundRtpStats),

    /// [`outbound-rtp`][1] entry.
    ///
    /// [1]: https://w3.org/TR/webrtc-stats/#dom-rtcstatstype-outbound-rtp
    OutboundRtp(OutboundRtpStats),

    /// [`candidate-pair`][1] entry.
    ///
    /// [1]: https://w3.org/TR/webrtc-stats/#dom-rtcstatstype-candidate-pair
    CandidatePair(CandidatePairStats),

    /// [`local-candidate`][1] entry.
    ///
    /// [1]: https://w3.org/TR/webrtc-stats/#dom-rtcstatstype-local-candidate
    LocalCandidate(IceCandidateStats),

    /// [`remote-candidate`][1] entry.
    ///
    /// [1]: https://w3.org/TR/webrtc-stats/#dom-rtcstatstype-remote-candidate
    RemoteCandidate(IceCandidateStats),

    /// Any other entry type; ignored by the normalizer.
    #[serde(other)]
    Other,
}

/// Inbound RTP stream counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InboundRtpStats {
    /// SSRC of the inbound stream.
    pub ssrc: u32,

    /// Media kind of the stream (`audio`/`video`).
    pub kind: String,

    /// Total bytes received on the stream.
    pub bytes_received: u64,

    /// Total packets received on the stream.
    pub packets_received: u64,

    /// Total packets lost on the stream. Can go negative on stacks counting
    /// duplicates.
    pub packets_lost: i64,

    /// Width of the last decoded frame, for video.
    pub frame_width: Option<u32>,

    /// Height of the last decoded frame, for video.
    pub frame_height: Option<u32>,

    /// Current audio level of the stream.
    ///
    /// Normalized to `[0; 1]` by spec-conforming stacks; some report the
    /// raw 15-bit sample value instead.
    pub audio_level: Option<f64>,
}

/// Outbound RTP stream counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutboundRtpStats {
    /// SSRC of the outbound stream.
    pub ssrc: u32,

    /// Media kind of the stream (`audio`/`video`).
    pub kind: String,

    /// Total bytes sent on the stream.
    pub bytes_sent: u64,

    /// Total packets sent on the stream.
    pub packets_sent: u64,

    /// Total packets reported lost by the remote end.
    pub packets_lost: i64,

    /// Width of the last encoded frame, for video.
    pub frame_width: Option<u32>,

    /// Height of the last encoded frame, for video.
    pub frame_height: Option<u32>,

    /// Current audio level of the local source feeding this stream.
    pub audio_level: Option<f64>,
}

/// ICE candidate pair counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CandidatePairStats {
    /// Unique ID of the pair within the report.
    pub id: String,

    /// Whether this pair has been nominated.
    pub nominated: bool,

    /// Check state of the pair (`succeeded`, `in-progress`, ...).
    pub state: String,

    /// ID of the local candidate of the pair.
    pub local_candidate_id: String,

    /// ID of the remote candidate of the pair.
    pub remote_candidate_id: String,

    /// Available outgoing bitrate estimate, in bits per second.
    pub available_outgoing_bitrate: Option<u64>,

    /// Available incoming bitrate estimate, in bits per second.
    pub available_incoming_bitrate: Option<u64>,
}

/// Local or remote ICE candidate description.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IceCandidateStats {
    /// Unique ID of the candidate within the report.
    pub id: String,

    /// Address of the candidate.
    pub address: Option<String>,

    /// Port of the candidate.
    pub port: Option<u16>,

    /// Transport protocol of the candidate (`udp`/`tcp`).
    pub protocol: Option<String>,

    /// Type of the candidate (`host`, `srflx`, `prflx`, `relay`).
    pub candidate_type: String,
}
