//! Local and remote media model.

mod codec;
mod settings;
pub mod track;

use derive_more::Display;

#[doc(inline)]
pub use self::{
    codec::{Codec, CodecSettings},
    settings::{
        AudioQualitySettings, BitrateTable, VideoQualitySettings,
    },
};
pub use argo_colibri_proto::{EndpointId, SourceName, VideoType};

/// [MediaStreamTrack.kind][1] representation.
///
/// [1]: https://w3.org/TR/mediacapture-streams/#dom-mediastreamtrack-kind
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MediaKind {
    /// Audio track.
    #[display(fmt = "audio")]
    Audio,

    /// Video track.
    #[display(fmt = "video")]
    Video,
}

impl MediaKind {
    /// Returns string representation of a [`MediaKind`].
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Parses a [`MediaKind`] out of its string representation.
    #[must_use]
    pub fn from_str(kind: &str) -> Option<Self> {
        match kind {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// ID of a local track, assigned by the coordinator owning it.
#[derive(
    Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
pub struct TrackId(pub u64);

/// Builds the globally unique [`SourceName`] of a local source:
/// `<endpoint>-<kind letter><index>` (e.g. `alice-v0`).
#[must_use]
pub fn compose_source_name(
    endpoint: &EndpointId,
    kind: MediaKind,
    index: usize,
) -> SourceName {
    let letter = match kind {
        MediaKind::Audio => 'a',
        MediaKind::Video => 'v',
    };
    SourceName(format!("{}-{}{}", endpoint, letter, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names_follow_the_endpoint_kind_index_scheme() {
        let endpoint = EndpointId::from("alice");
        assert_eq!(
            compose_source_name(&endpoint, MediaKind::Video, 0).0,
            "alice-v0",
        );
        assert_eq!(
            compose_source_name(&endpoint, MediaKind::Audio, 2).0,
            "alice-a2",
        );
    }
}
