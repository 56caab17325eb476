//! Codec identification and preference settings.

use derive_more::Display;

use super::MediaKind;

/// Codecs this crate can negotiate and configure.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum Codec {
    /// Opus audio.
    #[display(fmt = "opus")]
    Opus,

    /// VP8 video.
    #[display(fmt = "VP8")]
    Vp8,

    /// VP9 video.
    #[display(fmt = "VP9")]
    Vp9,

    /// H.264 video.
    #[display(fmt = "H264")]
    H264,

    /// AV1 video.
    #[display(fmt = "AV1")]
    Av1,
}

impl Codec {
    /// Returns the codec name as it appears in `a=rtpmap` lines.
    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::H264 => "H264",
            Self::Av1 => "AV1",
        }
    }

    /// Parses a [`Codec`] out of an `a=rtpmap` codec name
    /// (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Opus, Self::Vp8, Self::Vp9, Self::H264, Self::Av1]
            .iter()
            .copied()
            .find(|codec| codec.name().eq_ignore_ascii_case(name))
    }

    /// Indicates whether the codec supports spatial scalability (SVC)
    /// within a single RTP stream.
    #[inline]
    #[must_use]
    pub fn is_svc_capable(self) -> bool {
        matches!(self, Self::Vp9 | Self::Av1)
    }
}

/// Ordered codec preference of a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CodecSettings {
    /// Media kind the preference applies to.
    pub media_type: MediaKind,

    /// Preferred codecs, most preferred first.
    pub codec_list: Vec<Codec>,

    /// Codecs stripped out of every negotiation.
    pub disabled_codecs: Vec<Codec>,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            media_type: MediaKind::Video,
            codec_list: vec![Codec::Vp8, Codec::Vp9, Codec::H264],
            disabled_codecs: Vec::new(),
        }
    }
}

impl CodecSettings {
    /// Returns the codec this preference selects, when any.
    #[inline]
    #[must_use]
    pub fn preferred(&self) -> Option<Codec> {
        self.codec_list.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_names_roundtrip_case_insensitively() {
        for codec in
            [Codec::Opus, Codec::Vp8, Codec::Vp9, Codec::H264, Codec::Av1]
                .iter()
        {
            assert_eq!(Codec::from_name(codec.name()), Some(*codec));
            assert_eq!(
                Codec::from_name(&codec.name().to_lowercase()),
                Some(*codec),
            );
        }
        assert_eq!(Codec::from_name("speex"), None);
    }
}
