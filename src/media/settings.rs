//! Quality settings driving the Opus patches and the encoder policy.

use super::Codec;

/// Audio quality knobs, applied through Opus fmtp munging.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AudioQualitySettings {
    /// Negotiate stereo Opus.
    pub stereo: bool,

    /// Enable Opus discontinuous transmission.
    pub enable_opus_dtx: bool,

    /// Non-default `maxaveragebitrate` for Opus, in bits per second.
    pub opus_max_average_bitrate: Option<u32>,
}

/// Per-codec maximum bitrates, in bits per second, keyed by quality
/// level.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BitrateTable {
    /// Low quality layer (up to 180p).
    pub low: u64,

    /// Standard quality layer (up to 360p).
    pub standard: u64,

    /// High quality layer (above 360p).
    pub high: u64,

    /// Screen-sharing in high quality.
    pub ss_high: u64,
}

impl BitrateTable {
    /// Returns the cap of the camera layer with the provided height.
    #[must_use]
    pub fn for_height(&self, height: u32) -> u64 {
        if height <= 180 {
            self.low
        } else if height <= 360 {
            self.standard
        } else {
            self.high
        }
    }
}

/// Bitrate tables of every supported video codec.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VideoQualitySettings {
    /// Caps for VP8.
    pub vp8: BitrateTable,

    /// Caps for VP9.
    pub vp9: BitrateTable,

    /// Caps for H.264.
    pub h264: BitrateTable,

    /// Caps for AV1.
    pub av1: BitrateTable,
}

impl VideoQualitySettings {
    /// Returns the [`BitrateTable`] of the provided codec.
    ///
    /// Audio codecs fall back to the VP8 table; they never reach the
    /// encoder policy anyway.
    #[must_use]
    pub fn table(&self, codec: Codec) -> &BitrateTable {
        match codec {
            Codec::Vp9 => &self.vp9,
            Codec::H264 => &self.h264,
            Codec::Av1 => &self.av1,
            Codec::Vp8 | Codec::Opus => &self.vp8,
        }
    }
}

impl Default for VideoQualitySettings {
    fn default() -> Self {
        Self {
            vp8: BitrateTable {
                low: 200_000,
                standard: 500_000,
                high: 1_500_000,
                ss_high: 2_500_000,
            },
            vp9: BitrateTable {
                low: 100_000,
                standard: 300_000,
                high: 1_200_000,
                ss_high: 2_500_000,
            },
            h264: BitrateTable {
                low: 200_000,
                standard: 500_000,
                high: 1_500_000,
                ss_high: 2_500_000,
            },
            av1: BitrateTable {
                low: 100_000,
                standard: 300_000,
                high: 1_000_000,
                ss_high: 2_500_000,
            },
        }
    }
}
