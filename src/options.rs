//! Session-wide configuration of the core.

use crate::media::{
    AudioQualitySettings, CodecSettings, VideoQualitySettings,
};

/// Configuration handed to the coordinator at construction.
///
/// Everything here is plain data: the core keeps no global state and reads
/// no environment.
#[derive(Clone, Debug)]
pub struct RtcOptions {
    /// Forces single-layer sending even where simulcast would apply.
    pub disable_simulcast: bool,

    /// Suppresses RTX pairing of local video SSRCs.
    pub disable_rtx: bool,

    /// Exposes encoded frames of senders/receivers to the application.
    pub enable_insertable_streams: bool,

    /// Restricts ICE to TURN-relayed candidates.
    pub force_turn_relay: bool,

    /// Starts every session with audio transfer inactive.
    pub start_silent: bool,

    /// Forces the low-fps screen-sharing mode with its capped bitrate.
    pub cap_screenshare_bitrate: bool,

    /// Re-wires the encoded-streams processor pipeline when a sender's
    /// track is replaced. Upstream stacks disagree on whether this is
    /// needed, hence the switch.
    pub rewire_insertable_streams_on_replace: bool,

    /// Codec preference of the session.
    pub codec_settings: CodecSettings,

    /// Audio quality knobs (Opus fmtp munging).
    pub audio_quality: AudioQualitySettings,

    /// Bitrate tables for video encoders.
    pub video_quality: VideoQualitySettings,

    /// Bound of the stats snapshot ring buffer. `0` disables stats
    /// collection entirely.
    pub max_stats: usize,
}

impl Default for RtcOptions {
    fn default() -> Self {
        Self {
            disable_simulcast: false,
            disable_rtx: false,
            enable_insertable_streams: false,
            force_turn_relay: false,
            start_silent: false,
            cap_screenshare_bitrate: false,
            rewire_insertable_streams_on_replace: false,
            codec_settings: CodecSettings::default(),
            audio_quality: AudioQualitySettings::default(),
            video_quality: VideoQualitySettings::default(),
            max_stats: 300,
        }
    }
}
