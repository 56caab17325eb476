//! Persistent mapping of local sources to their negotiated SSRCs.

use std::collections::BTreeMap;

use crate::media::MediaKind;

use super::{SectionKind, SessionDescription, SsrcGroup};

/// SSRCs and groups a single local source is carried on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SsrcInfo {
    /// Primary SSRCs of the source, lowest encoding first.
    pub ssrcs: Vec<u32>,

    /// SSRC groups referencing the source.
    pub groups: Vec<SsrcGroup>,

    /// `msid` the source is announced under.
    pub msid: Option<String>,
}

/// Key of a local source: its media kind plus its index among sending
/// sections of that kind.
pub type SourceKey = (MediaKind, usize);

/// Change of a source's primary SSRC between two renegotiations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SsrcUpdate {
    /// Kind of the affected source.
    pub kind: MediaKind,

    /// Index of the affected source within its kind.
    pub source_index: usize,

    /// Primary SSRC the source was known under.
    pub previous: u32,

    /// Primary SSRC the source is carried on now.
    pub current: u32,
}

/// Extracts per-source SSRC assignments out of a munged local description.
///
/// Sources are keyed by `(kind, index)` where the index counts sending
/// sections of that kind, in order.
#[must_use]
pub fn extract_source_ssrcs(
    desc: &SessionDescription,
) -> BTreeMap<SourceKey, SsrcInfo> {
    let mut out = BTreeMap::new();
    for kind in [MediaKind::Audio, MediaKind::Video].iter().copied() {
        let section_kind = match kind {
            MediaKind::Audio => SectionKind::Audio,
            MediaKind::Video => SectionKind::Video,
        };
        let mut index = 0;
        for section in desc.media_of_kind(section_kind) {
            if !section.direction_or_default().is_sending() {
                continue;
            }
            let ssrcs = section.primary_ssrcs();
            if ssrcs.is_empty() {
                continue;
            }
            let msid = ssrcs
                .first()
                .and_then(|s| section.msid_of_ssrc(*s))
                .map(ToOwned::to_owned);
            out.insert(
                (kind, index),
                SsrcInfo {
                    ssrcs,
                    groups: section.ssrc_groups.clone(),
                    msid,
                },
            );
            index += 1;
        }
    }
    out
}

/// Cache of local source SSRCs, persisted across renegotiations by a
/// single peer connection.
#[derive(Debug, Default)]
pub struct LocalSsrcMap {
    entries: BTreeMap<SourceKey, SsrcInfo>,
}

impl LocalSsrcMap {
    /// Creates an empty [`LocalSsrcMap`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached [`SsrcInfo`] of the provided source.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &SourceKey) -> Option<&SsrcInfo> {
        self.entries.get(key)
    }

    /// Replaces the cached assignments with the ones extracted from a new
    /// local description, reporting every replaced primary SSRC.
    pub fn update(
        &mut self,
        new: BTreeMap<SourceKey, SsrcInfo>,
    ) -> Vec<SsrcUpdate> {
        let mut updates = Vec::new();
        for ((kind, index), info) in &new {
            if let (Some(previous), Some(current)) = (
                self.entries
                    .get(&(*kind, *index))
                    .and_then(|old| old.ssrcs.first().copied()),
                info.ssrcs.first().copied(),
            ) {
                if previous != current {
                    updates.push(SsrcUpdate {
                        kind: *kind,
                        source_index: *index,
                        previous,
                        current,
                    });
                }
            }
        }
        self.entries = new;
        updates
    }
}

#[cfg(test)]
mod tests {
    use crate::sdp::SessionDescription;

    use super::*;

    const TWO_SOURCES: &str = "v=0\r\n\
        o=- 1 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        a=mid:0\r\n\
        a=sendrecv\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=ssrc:1001 cname:x\r\n\
        a=ssrc:1001 msid:s a0\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
        a=mid:1\r\n\
        a=sendonly\r\n\
        a=rtpmap:96 VP8/90000\r\n\
        a=ssrc-group:FID 2001 2002\r\n\
        a=ssrc:2001 cname:x\r\n\
        a=ssrc:2001 msid:s v0\r\n\
        a=ssrc:2002 cname:x\r\n\
        a=ssrc:2002 msid:s v0\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
        a=mid:2\r\n\
        a=recvonly\r\n\
        a=rtpmap:96 VP8/90000\r\n";

    #[test]
    fn extraction_indexes_sending_sections_per_kind() {
        let desc = SessionDescription::parse(TWO_SOURCES).unwrap();
        let map = extract_source_ssrcs(&desc);

        assert_eq!(map.len(), 2);
        let audio = &map[&(MediaKind::Audio, 0)];
        assert_eq!(audio.ssrcs, vec![1001]);
        assert_eq!(audio.msid.as_deref(), Some("s a0"));

        let video = &map[&(MediaKind::Video, 0)];
        assert_eq!(video.ssrcs, vec![2001]);
        assert_eq!(video.groups.len(), 1);
    }

    #[test]
    fn replaced_primary_is_reported() {
        let desc = SessionDescription::parse(TWO_SOURCES).unwrap();
        let mut map = LocalSsrcMap::new();
        assert!(map.update(extract_source_ssrcs(&desc)).is_empty());

        let renegotiated =
            TWO_SOURCES.replace("2001", "9001").replace("2002", "9002");
        let desc = SessionDescription::parse(&renegotiated).unwrap();
        let updates = map.update(extract_source_ssrcs(&desc));

        assert_eq!(
            updates,
            vec![SsrcUpdate {
                kind: MediaKind::Video,
                source_index: 0,
                previous: 2001,
                current: 9001,
            }],
        );
    }
}
