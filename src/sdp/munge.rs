//! Munging pipelines applied to descriptions before they reach the native
//! stack.
//!
//! Every function here is a pure transform over [`SessionDescription`]:
//! the input is left untouched and a new description is returned. All
//! transforms are idempotent, so re-running a pipeline over an already
//! munged description changes nothing.

use crate::media::{AudioQualitySettings, Codec};

use super::{
    set_fmtp_param, Direction, ExtMap, GroupSemantics, MediaSection,
    SectionKind, SessionDescription,
};

/// URI of the Dependency Descriptor RTP header extension.
pub const DEPENDENCY_DESCRIPTOR_URI: &str = "https://aomediacodec.github.io/av1-rtp-spec/#dependency-descriptor-rtp-header-extension";

/// Stream ID of the conference-wide mixed stream the SFU terminates RTCP
/// on. Tracks arriving on it are never real remote sources.
pub const MIXED_STREAM_ID: &str = "mixedmslabel";

/// Knobs of the munging pipelines, derived from the session configuration
/// by the peer connection owning them.
#[derive(Clone, Debug)]
pub struct MungeOptions {
    /// Whether the session is peer-to-peer (as opposed to facing the SFU).
    pub is_p2p: bool,

    /// Audio quality knobs driving the Opus fmtp patches.
    pub audio_quality: AudioQualitySettings,

    /// Ordered video codec preference.
    pub video_codec_preference: Vec<Codec>,

    /// Codecs stripped out of every negotiation.
    pub disabled_codecs: Vec<Codec>,

    /// Whether the native stack honors the `usedtx` Opus parameter when
    /// sending.
    pub opus_dtx_supported: bool,

    /// Whether scalability-mode selection is enabled for codecs that carry
    /// scalability out-of-band (H.264).
    pub scalability_mode_enabled: bool,

    /// `b=AS` cap injected on sending video m-lines when an SVC mode of
    /// VP9 is negotiated.
    pub svc_bandwidth_kbps: Option<u32>,

    /// Number of video receive m-lines to keep available when simulcast
    /// reception is on.
    pub simulcast_recv_sections: Option<usize>,
}

impl MungeOptions {
    /// Returns the codec this session prefers for video.
    #[inline]
    #[must_use]
    pub fn preferred_video_codec(&self) -> Option<Codec> {
        self.video_codec_preference.first().copied()
    }
}

/// Per-kind numbers of local sources, driving the peer-to-peer direction
/// adjustment.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SourceCounts {
    /// Number of local audio sources.
    pub audio: usize,

    /// Number of local video sources.
    pub video: usize,
}

impl SourceCounts {
    fn of_kind(self, kind: SectionKind) -> usize {
        match kind {
            SectionKind::Audio => self.audio,
            SectionKind::Video => self.video,
            SectionKind::Application => 0,
        }
    }
}

/// Pipeline applied to local descriptions before `setLocalDescription`.
#[must_use]
pub fn munge_local_description(
    desc: &SessionDescription,
    opts: &MungeOptions,
) -> SessionDescription {
    let mut out = munge_opus(desc, &opts.audio_quality, opts.opus_dtx_supported);
    out = reorder_codec_payloads(
        &out,
        SectionKind::Video,
        &opts.video_codec_preference,
    );
    out = strip_disabled_codecs(&out, &opts.disabled_codecs);
    if opts.is_p2p {
        out = strip_fragile_codecs(&out);
    }
    if let Some(kbps) = opts.svc_bandwidth_kbps {
        if opts.preferred_video_codec() == Some(Codec::Vp9) {
            out = set_svc_bandwidth(&out, kbps);
        }
    }
    reconcile_dependency_descriptor(
        &out,
        opts.preferred_video_codec(),
        opts.scalability_mode_enabled,
    )
}

/// Pipeline applied to remote descriptions before `setRemoteDescription`.
///
/// `local` carries the local source counts used by the peer-to-peer
/// direction table.
#[must_use]
pub fn munge_remote_description(
    desc: &SessionDescription,
    opts: &MungeOptions,
    local: SourceCounts,
) -> SessionDescription {
    let mut out = munge_opus(desc, &opts.audio_quality, opts.opus_dtx_supported);
    if !opts.is_p2p {
        out = plan_b_to_unified(&out);
        if let Some(wanted) = opts.simulcast_recv_sections {
            out = ensure_recv_sections(&out, SectionKind::Video, wanted);
        }
    }
    out = order_ssrc_groups(&out);
    if opts.is_p2p {
        out = adjust_p2p_directions(&out, local);
    }
    out = reorder_codec_payloads(
        &out,
        SectionKind::Video,
        &opts.video_codec_preference,
    );
    out = strip_disabled_codecs(&out, &opts.disabled_codecs);
    if opts.is_p2p {
        out = strip_fragile_codecs(&out);
    }
    if let Some(kbps) = opts.svc_bandwidth_kbps {
        if opts.preferred_video_codec() == Some(Codec::Vp9) {
            out = set_svc_bandwidth(&out, kbps);
        }
    }
    reconcile_dependency_descriptor(
        &out,
        opts.preferred_video_codec(),
        opts.scalability_mode_enabled,
    )
}

/// Patches the Opus fmtp line according to the audio quality settings.
///
/// `usedtx` is only injected when the sending side is known to honor it.
#[must_use]
pub fn munge_opus(
    desc: &SessionDescription,
    audio: &AudioQualitySettings,
    dtx_supported: bool,
) -> SessionDescription {
    let mut out = desc.clone();
    for section in &mut out.media {
        if section.kind != SectionKind::Audio {
            continue;
        }
        for pt in section.payloads_of_codec(Codec::Opus.name()) {
            let mut params = section
                .fmtp(&pt)
                .map(ToOwned::to_owned)
                .unwrap_or_default();
            if audio.stereo {
                params = set_fmtp_param(&params, "stereo", "1");
                params = set_fmtp_param(&params, "sprop-stereo", "1");
            }
            if audio.enable_opus_dtx && dtx_supported {
                params = set_fmtp_param(&params, "usedtx", "1");
            }
            if let Some(bitrate) = audio.opus_max_average_bitrate {
                params = set_fmtp_param(
                    &params,
                    "maxaveragebitrate",
                    &bitrate.to_string(),
                );
            }
            match section.fmtp.iter_mut().find(|(p, _)| *p == pt) {
                Some((_, existing)) => *existing = params,
                None => {
                    if !params.is_empty() {
                        section.fmtp.push((pt.clone(), params));
                    }
                }
            }
        }
    }
    out
}

/// Reorders payload types of every `kind` section so that the preferred
/// codecs (and their RTX pairs) contiguously lead the list.
///
/// The reorder is prefix-stable: the relative order of everything else is
/// preserved.
#[must_use]
pub fn reorder_codec_payloads(
    desc: &SessionDescription,
    kind: SectionKind,
    preference: &[Codec],
) -> SessionDescription {
    let mut out = desc.clone();
    for section in &mut out.media {
        if section.kind != kind {
            continue;
        }
        let mut head: Vec<String> = Vec::new();
        for codec in preference {
            let primaries = section.payloads_of_codec(codec.name());
            let rtx = section.rtx_payloads_of(&primaries);
            for pt in primaries.into_iter().chain(rtx) {
                if !head.contains(&pt) {
                    head.push(pt);
                }
            }
        }
        let tail: Vec<String> = section
            .formats
            .iter()
            .filter(|pt| !head.contains(pt))
            .cloned()
            .collect();
        head.extend(tail);
        section.formats = head;
    }
    out
}

/// Strips the provided codecs (and their RTX pairs) out of every section.
#[must_use]
pub fn strip_disabled_codecs(
    desc: &SessionDescription,
    disabled: &[Codec],
) -> SessionDescription {
    let mut out = desc.clone();
    for section in &mut out.media {
        let mut doomed: Vec<String> = Vec::new();
        for codec in disabled {
            doomed.extend(section.payloads_of_codec(codec.name()));
        }
        let rtx = section.rtx_payloads_of(&doomed);
        doomed.extend(rtx);
        section.remove_payloads(&doomed);
    }
    out
}

/// Strips codec variants known to break asymmetric peer-to-peer
/// negotiations: high-profile H.264, high-profile VP9, and ULPFEC/RED.
#[must_use]
pub fn strip_fragile_codecs(desc: &SessionDescription) -> SessionDescription {
    let mut out = desc.clone();
    for section in &mut out.media {
        if section.kind != SectionKind::Video {
            continue;
        }
        let mut doomed: Vec<String> = Vec::new();
        for pt in section.payloads_of_codec(Codec::H264.name()) {
            let high_profile = section
                .fmtp(&pt)
                .and_then(|p| super::fmtp_param(p, "profile-level-id"))
                .map_or(false, |profile| profile.starts_with("64"));
            if high_profile {
                doomed.push(pt);
            }
        }
        for pt in section.payloads_of_codec(Codec::Vp9.name()) {
            let high_profile = section
                .fmtp(&pt)
                .and_then(|p| super::fmtp_param(p, "profile-id"))
                .map_or(false, |profile| profile == "2");
            if high_profile {
                doomed.push(pt);
            }
        }
        doomed.extend(section.payloads_of_codec("red"));
        doomed.extend(section.payloads_of_codec("ulpfec"));
        let rtx = section.rtx_payloads_of(&doomed);
        doomed.extend(rtx);
        section.remove_payloads(&doomed);
    }
    out
}

/// Injects a `b=AS` cap on every sending video m-line.
#[must_use]
pub fn set_svc_bandwidth(
    desc: &SessionDescription,
    kbps: u32,
) -> SessionDescription {
    let mut out = desc.clone();
    for section in &mut out.media {
        if section.kind == SectionKind::Video
            && section.direction_or_default().is_sending()
        {
            section.bandwidth_as = Some(kbps);
        }
    }
    out
}

/// Ensures the Dependency Descriptor header extension is offered on
/// sending video m-lines exactly when the chosen codec needs it: AV1
/// always, H.264 only with scalability-mode selection enabled.
#[must_use]
pub fn reconcile_dependency_descriptor(
    desc: &SessionDescription,
    codec: Option<Codec>,
    scalability_mode_enabled: bool,
) -> SessionDescription {
    let needs_dd = match codec {
        Some(Codec::Av1) => true,
        Some(Codec::H264) => scalability_mode_enabled,
        _ => false,
    };
    let mut out = desc.clone();
    for section in &mut out.media {
        if section.kind != SectionKind::Video {
            continue;
        }
        let present =
            section.extmap_by_uri(DEPENDENCY_DESCRIPTOR_URI).is_some();
        let sending = section.direction_or_default().is_sending();
        if needs_dd && sending && !present {
            let id = section
                .extmaps
                .iter()
                .map(|e| e.id)
                .max()
                .map_or(1, |max| max + 1);
            section.extmaps.push(ExtMap {
                id,
                direction: None,
                uri: DEPENDENCY_DESCRIPTOR_URI.to_owned(),
            });
        } else if !needs_dd && present {
            section
                .extmaps
                .retain(|e| e.uri != DEPENDENCY_DESCRIPTOR_URI);
        }
    }
    out
}

/// Rewrites a Plan-B-style description (one m-line per media type carrying
/// many sources) into one-m-line-per-source form, preserving SSRC
/// identities and group relations.
///
/// Sources are told apart by the `msid` of their SSRCs. Descriptions that
/// are already unified pass through unchanged.
#[must_use]
pub fn plan_b_to_unified(desc: &SessionDescription) -> SessionDescription {
    let mut out = desc.clone();
    let mut media = Vec::with_capacity(out.media.len());

    for section in out.media.drain(..) {
        if section.kind == SectionKind::Application {
            media.push(section);
            continue;
        }
        let sources = sources_of(&section);
        if sources.len() <= 1 {
            media.push(section);
            continue;
        }
        for (idx, (msid, ssrcs)) in sources.into_iter().enumerate() {
            let mut split = section.clone();
            split.ssrc_lines = section
                .ssrc_lines
                .iter()
                .filter(|l| ssrcs.contains(&l.ssrc))
                .cloned()
                .collect();
            split.ssrc_groups = section
                .ssrc_groups
                .iter()
                .filter(|g| {
                    g.ssrcs.first().map_or(false, |s| ssrcs.contains(s))
                })
                .cloned()
                .collect();
            split.msid = Some(msid);
            if idx > 0 {
                split.mid = section
                    .mid
                    .as_ref()
                    .map(|mid| format!("{}-{}", mid, idx));
            }
            media.push(split);
        }
    }

    out.media = media;
    out.rewrite_bundle();
    out
}

/// Appends empty `recvonly` video m-lines until at least `wanted` video
/// sections exist, so that simulcast reception never runs out of
/// transceivers.
#[must_use]
pub fn ensure_recv_sections(
    desc: &SessionDescription,
    kind: SectionKind,
    wanted: usize,
) -> SessionDescription {
    let mut out = desc.clone();
    let template = match out.media.iter().find(|m| m.kind == kind) {
        Some(t) => t.clone(),
        None => return out,
    };
    let mut count = out.media.iter().filter(|m| m.kind == kind).count();
    while count < wanted {
        let mut extra = template.clone();
        extra.ssrc_lines.clear();
        extra.ssrc_groups.clear();
        extra.msid = None;
        extra.bandwidth_as = None;
        extra.direction = Some(Direction::RecvOnly);
        extra.mid = template
            .mid
            .as_ref()
            .map(|mid| format!("{}-recv-{}", mid, count));
        out.media.push(extra);
        count += 1;
    }
    out.rewrite_bundle();
    out
}

/// Enforces SSRC-group ordering: SIM groups precede FID groups, and every
/// FID group lists its primary first.
#[must_use]
pub fn order_ssrc_groups(desc: &SessionDescription) -> SessionDescription {
    let mut out = desc.clone();
    for section in &mut out.media {
        let sim_members: Vec<u32> = section
            .ssrc_groups
            .iter()
            .filter(|g| g.semantics == GroupSemantics::Sim)
            .flat_map(|g| g.ssrcs.clone())
            .collect();
        for group in &mut section.ssrc_groups {
            if group.semantics == GroupSemantics::Fid
                && group.ssrcs.len() == 2
                && !sim_members.is_empty()
                && sim_members.contains(&group.ssrcs[1])
                && !sim_members.contains(&group.ssrcs[0])
            {
                group.ssrcs.swap(0, 1);
            }
        }
        section.ssrc_groups.sort_by_key(|g| match g.semantics {
            GroupSemantics::Sim => 0,
            GroupSemantics::Fid => 1,
            GroupSemantics::FecFr => 2,
            GroupSemantics::Other(_) => 3,
        });
    }
    out
}

/// Adjusts the direction of every audio/video m-line of a peer-to-peer
/// remote description as a function of local and remote source counts.
///
/// Directions are expressed from the remote peer's point of view: an
/// m-line carrying a remote source we do not answer with our own becomes
/// `sendonly`, a local-only one becomes `recvonly`.
#[must_use]
pub fn adjust_p2p_directions(
    desc: &SessionDescription,
    local: SourceCounts,
) -> SessionDescription {
    let mut out = desc.clone();
    for kind in [SectionKind::Audio, SectionKind::Video].iter().copied() {
        let remote = out
            .media_of_kind(kind)
            .filter(|m| !m.distinct_ssrcs().is_empty())
            .count();
        let local = local.of_kind(kind);
        let paired = local.min(remote);

        let mut idx = 0;
        for section in &mut out.media {
            if section.kind != kind {
                continue;
            }
            section.direction = Some(if idx < paired {
                Direction::SendRecv
            } else if idx < remote {
                Direction::SendOnly
            } else if idx < local {
                Direction::RecvOnly
            } else {
                Direction::Inactive
            });
            idx += 1;
        }
    }
    out
}

/// Groups primary SSRCs of a section by source (`msid`), in first-seen
/// order. Pair members (RTX/FEC) travel with their primary.
fn sources_of(section: &MediaSection) -> Vec<(String, Vec<u32>)> {
    let mut sources: Vec<(String, Vec<u32>)> = Vec::new();
    for primary in section.primary_ssrcs() {
        let msid = match section.msid_of_ssrc(primary) {
            Some(msid) => msid.to_owned(),
            None => continue,
        };
        let mut ssrcs = vec![primary];
        for group in &section.ssrc_groups {
            if group.ssrcs.first() == Some(&primary) {
                ssrcs.extend(group.ssrcs.iter().skip(1).copied());
            }
        }
        match sources.iter_mut().find(|(m, _)| *m == msid) {
            Some((_, existing)) => {
                for ssrc in ssrcs {
                    if !existing.contains(&ssrc) {
                        existing.push(ssrc);
                    }
                }
            }
            None => sources.push((msid, ssrcs)),
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use crate::media::{AudioQualitySettings, Codec};

    use super::*;

    fn opts() -> MungeOptions {
        MungeOptions {
            is_p2p: false,
            audio_quality: AudioQualitySettings {
                stereo: true,
                enable_opus_dtx: true,
                opus_max_average_bitrate: Some(510_000),
            },
            video_codec_preference: vec![Codec::Vp8],
            disabled_codecs: Vec::new(),
            opus_dtx_supported: true,
            scalability_mode_enabled: false,
            svc_bandwidth_kbps: None,
            simulcast_recv_sections: None,
        }
    }

    const LOCAL_OFFER: &str = "v=0\r\n\
        o=- 1 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=group:BUNDLE 0 1\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        a=mid:0\r\n\
        a=sendrecv\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=fmtp:111 minptime=10\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 100 101 96 97 102 127\r\n\
        a=mid:1\r\n\
        a=sendrecv\r\n\
        a=rtpmap:100 H264/90000\r\n\
        a=fmtp:100 profile-level-id=640c1f\r\n\
        a=rtpmap:101 rtx/90000\r\n\
        a=fmtp:101 apt=100\r\n\
        a=rtpmap:96 VP8/90000\r\n\
        a=rtpmap:97 rtx/90000\r\n\
        a=fmtp:97 apt=96\r\n\
        a=rtpmap:102 red/90000\r\n\
        a=rtpmap:127 ulpfec/90000\r\n\
        a=extmap:3 http://example.com/some-ext\r\n\
        a=ssrc:2001 cname:x\r\n\
        a=ssrc:2001 msid:s t\r\n";

    #[test]
    fn local_pipeline_is_idempotent() {
        let desc = SessionDescription::parse(LOCAL_OFFER).unwrap();
        let opts = opts();
        let once = munge_local_description(&desc, &opts);
        let twice = munge_local_description(&once, &opts);
        assert_eq!(once, twice);
        assert_eq!(once.to_string(), twice.to_string());
    }

    #[test]
    fn preferred_codec_leads_every_video_section() {
        let desc = SessionDescription::parse(LOCAL_OFFER).unwrap();
        let munged = munge_local_description(&desc, &opts());
        let video = &munged.media[1];
        assert_eq!(video.formats[0], "96");
        assert_eq!(video.formats[1], "97");
        // Prefix-stable: the rest keeps its relative order.
        let rest: Vec<&str> =
            video.formats[2..].iter().map(String::as_str).collect();
        assert_eq!(rest, vec!["100", "101", "102", "127"]);
    }

    #[test]
    fn opus_params_are_patched() {
        let desc = SessionDescription::parse(LOCAL_OFFER).unwrap();
        let munged = munge_local_description(&desc, &opts());
        let params = munged.media[0].fmtp("111").unwrap();
        assert!(params.contains("stereo=1"));
        assert!(params.contains("sprop-stereo=1"));
        assert!(params.contains("usedtx=1"));
        assert!(params.contains("maxaveragebitrate=510000"));
        assert!(params.starts_with("minptime=10"));
    }

    #[test]
    fn dtx_is_suppressed_for_non_honoring_senders() {
        let desc = SessionDescription::parse(LOCAL_OFFER).unwrap();
        let mut opts = opts();
        opts.opus_dtx_supported = false;
        let munged = munge_local_description(&desc, &opts);
        assert!(!munged.media[0].fmtp("111").unwrap().contains("usedtx"));
    }

    #[test]
    fn p2p_strips_fragile_codecs() {
        let desc = SessionDescription::parse(LOCAL_OFFER).unwrap();
        let mut opts = opts();
        opts.is_p2p = true;
        let munged = munge_local_description(&desc, &opts);
        let video = &munged.media[1];
        // High-profile H.264, RED, ULPFEC and their RTX are gone.
        assert_eq!(video.formats, vec!["96", "97"]);
        assert!(video.rtpmap("100").is_none());
        assert!(video.fmtp("101").is_none());
    }

    #[test]
    fn dependency_descriptor_follows_the_codec() {
        let desc = SessionDescription::parse(LOCAL_OFFER).unwrap();
        let mut opts = opts();

        opts.video_codec_preference = vec![Codec::Av1];
        let munged = munge_local_description(&desc, &opts);
        assert!(munged.media[1]
            .extmap_by_uri(DEPENDENCY_DESCRIPTOR_URI)
            .is_some());

        // Re-munging towards VP8 removes it again.
        opts.video_codec_preference = vec![Codec::Vp8];
        let back = munge_local_description(&munged, &opts);
        assert!(back.media[1]
            .extmap_by_uri(DEPENDENCY_DESCRIPTOR_URI)
            .is_none());
    }

    #[test]
    fn svc_bandwidth_is_injected_for_vp9() {
        let desc = SessionDescription::parse(LOCAL_OFFER).unwrap();
        let mut opts = opts();
        opts.video_codec_preference = vec![Codec::Vp9];
        opts.svc_bandwidth_kbps = Some(2500);
        let munged = munge_local_description(&desc, &opts);
        assert_eq!(munged.media[1].bandwidth_as, Some(2500));

        // Not for VP8.
        opts.video_codec_preference = vec![Codec::Vp8];
        let munged = munge_local_description(&desc, &opts);
        assert_eq!(munged.media[1].bandwidth_as, None);
    }

    const PLAN_B: &str = "v=0\r\n\
        o=- 1 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=group:BUNDLE video\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
        a=mid:video\r\n\
        a=sendonly\r\n\
        a=rtpmap:96 VP8/90000\r\n\
        a=rtpmap:97 rtx/90000\r\n\
        a=fmtp:97 apt=96\r\n\
        a=ssrc-group:FID 3001 3002\r\n\
        a=ssrc-group:FID 4001 4002\r\n\
        a=ssrc:3001 cname:a\r\n\
        a=ssrc:3001 msid:alice-stream v0\r\n\
        a=ssrc:3002 cname:a\r\n\
        a=ssrc:3002 msid:alice-stream v0\r\n\
        a=ssrc:4001 cname:b\r\n\
        a=ssrc:4001 msid:bob-stream v0\r\n\
        a=ssrc:4002 cname:b\r\n\
        a=ssrc:4002 msid:bob-stream v0\r\n";

    #[test]
    fn plan_b_explodes_into_one_section_per_source() {
        let desc = SessionDescription::parse(PLAN_B).unwrap();
        let unified = plan_b_to_unified(&desc);

        assert_eq!(unified.media.len(), 2);
        assert_eq!(unified.media[0].mid.as_deref(), Some("video"));
        assert_eq!(unified.media[1].mid.as_deref(), Some("video-1"));
        assert_eq!(unified.media[0].distinct_ssrcs(), vec![3001, 3002]);
        assert_eq!(unified.media[1].distinct_ssrcs(), vec![4001, 4002]);
        assert_eq!(unified.media[0].ssrc_groups.len(), 1);
        assert!(unified
            .session
            .contains(&"a=group:BUNDLE video video-1".to_owned()));

        // Already-unified descriptions pass through unchanged.
        assert_eq!(plan_b_to_unified(&unified), unified);
    }

    #[test]
    fn group_ordering_puts_sim_first_and_primaries_first() {
        let sdp = "v=0\r\n\
            o=- 1 2 IN IP4 127.0.0.1\r\n\
            s=-\r\n\
            t=0 0\r\n\
            m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
            a=mid:0\r\n\
            a=rtpmap:96 VP8/90000\r\n\
            a=ssrc-group:FID 3002 3001\r\n\
            a=ssrc-group:SIM 3001 4001\r\n\
            a=ssrc:3001 cname:a\r\n\
            a=ssrc:3002 cname:a\r\n\
            a=ssrc:4001 cname:a\r\n";
        let desc = SessionDescription::parse(sdp).unwrap();
        let ordered = order_ssrc_groups(&desc);
        let groups = &ordered.media[0].ssrc_groups;
        assert_eq!(groups[0].semantics, GroupSemantics::Sim);
        assert_eq!(groups[1].semantics, GroupSemantics::Fid);
        assert_eq!(groups[1].ssrcs, vec![3001, 3002]);
    }

    fn p2p_remote(sections: usize, with_sources: usize) -> SessionDescription {
        let mut sdp = String::from(
            "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
        );
        for i in 0..sections {
            sdp.push_str(&format!(
                "m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
                 a=mid:{}\r\n\
                 a=rtpmap:96 VP8/90000\r\n",
                i,
            ));
            if i < with_sources {
                sdp.push_str(&format!(
                    "a=ssrc:{} cname:x\r\na=ssrc:{} msid:s{} t\r\n",
                    5000 + i,
                    5000 + i,
                    i,
                ));
            }
        }
        SessionDescription::parse(&sdp).unwrap()
    }

    #[test]
    fn p2p_direction_table_holds() {
        for local in 0..=2_usize {
            for remote in 0..=2_usize {
                let sections = local.max(remote).max(1);
                let desc = p2p_remote(sections, remote);
                let adjusted = adjust_p2p_directions(
                    &desc,
                    SourceCounts {
                        audio: 0,
                        video: local,
                    },
                );
                for (i, section) in adjusted.media.iter().enumerate() {
                    let expected = if i < local.min(remote) {
                        Direction::SendRecv
                    } else if i < remote {
                        Direction::SendOnly
                    } else if i < local {
                        Direction::RecvOnly
                    } else {
                        Direction::Inactive
                    };
                    assert_eq!(
                        section.direction,
                        Some(expected),
                        "local={} remote={} mline={}",
                        local,
                        remote,
                        i,
                    );
                }
            }
        }
    }

    #[test]
    fn one_local_video_against_audio_and_video_peer() {
        // Local: no audio, one video. Remote: one of each.
        let sdp = "v=0\r\n\
            o=- 1 2 IN IP4 127.0.0.1\r\n\
            s=-\r\n\
            t=0 0\r\n\
            m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
            a=mid:0\r\n\
            a=rtpmap:111 opus/48000/2\r\n\
            a=ssrc:7001 cname:x\r\n\
            m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
            a=mid:1\r\n\
            a=rtpmap:96 VP8/90000\r\n\
            a=ssrc:7002 cname:x\r\n";
        let desc = SessionDescription::parse(sdp).unwrap();
        let adjusted = adjust_p2p_directions(
            &desc,
            SourceCounts {
                audio: 0,
                video: 1,
            },
        );
        assert_eq!(adjusted.media[0].direction, Some(Direction::SendOnly));
        assert_eq!(adjusted.media[1].direction, Some(Direction::SendRecv));
    }

    #[test]
    fn recv_sections_are_synthesized_up_to_wanted() {
        let desc = SessionDescription::parse(PLAN_B).unwrap();
        let grown = ensure_recv_sections(&desc, SectionKind::Video, 3);
        assert_eq!(
            grown.media.iter().filter(|m| m.kind == SectionKind::Video).count(),
            3,
        );
        assert!(grown.media[2].distinct_ssrcs().is_empty());
        assert_eq!(grown.media[2].direction, Some(Direction::RecvOnly));
        // Idempotent once the target count is reached.
        assert_eq!(ensure_recv_sections(&grown, SectionKind::Video, 3), grown);
    }
}
