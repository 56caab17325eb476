//! Session description model and munging pipelines.
//!
//! Descriptions coming from and going to the native stack are parsed into
//! [`SessionDescription`], transformed through the pipelines of
//! [`munge`], and serialized back. Every transformation produces a new
//! value; nothing mutates a description in place behind the caller's back.

pub mod munge;
pub mod rtx;
pub mod simulcast;
pub mod ssrc;

use std::fmt;

use derive_more::Display;

#[doc(inline)]
pub use self::{
    munge::MungeOptions,
    rtx::RtxModifier,
    simulcast::SimulcastInjector,
    ssrc::{LocalSsrcMap, SsrcInfo, SsrcUpdate},
};

/// Direction of a media section.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Direction {
    /// Media flows both ways.
    #[display(fmt = "sendrecv")]
    SendRecv,

    /// Media is only sent by this side.
    #[display(fmt = "sendonly")]
    SendOnly,

    /// Media is only received by this side.
    #[display(fmt = "recvonly")]
    RecvOnly,

    /// No media flows.
    #[display(fmt = "inactive")]
    Inactive,
}

impl Direction {
    /// Parses a [`Direction`] out of its SDP attribute name.
    #[must_use]
    pub fn from_attribute(name: &str) -> Option<Self> {
        Some(match name {
            "sendrecv" => Self::SendRecv,
            "sendonly" => Self::SendOnly,
            "recvonly" => Self::RecvOnly,
            "inactive" => Self::Inactive,
            _ => return None,
        })
    }

    /// Indicates whether this side sends media under this [`Direction`].
    #[inline]
    #[must_use]
    pub fn is_sending(self) -> bool {
        matches!(self, Self::SendRecv | Self::SendOnly)
    }
}

/// Kind of a media section.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum SectionKind {
    /// `m=audio` section.
    #[display(fmt = "audio")]
    Audio,

    /// `m=video` section.
    #[display(fmt = "video")]
    Video,

    /// `m=application` section (data channels).
    #[display(fmt = "application")]
    Application,
}

impl SectionKind {
    fn parse(kind: &str) -> Option<Self> {
        Some(match kind {
            "audio" => Self::Audio,
            "video" => Self::Video,
            "application" => Self::Application,
            _ => return None,
        })
    }
}

/// Semantics of an SSRC group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GroupSemantics {
    /// Flow identification: `[primary, rtx]` pair.
    Fid,

    /// Simulcast: alternate encodings of one source, lowest first.
    Sim,

    /// Forward error correction pairing.
    FecFr,

    /// Any other semantics, carried through untouched.
    Other(String),
}

impl GroupSemantics {
    fn parse(semantics: &str) -> Self {
        match semantics {
            "FID" => Self::Fid,
            "SIM" => Self::Sim,
            "FEC-FR" => Self::FecFr,
            _ => Self::Other(semantics.to_owned()),
        }
    }
}

impl fmt::Display for GroupSemantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fid => write!(f, "FID"),
            Self::Sim => write!(f, "SIM"),
            Self::FecFr => write!(f, "FEC-FR"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// `a=ssrc-group` line of a media section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SsrcGroup {
    /// Semantics of the group.
    pub semantics: GroupSemantics,

    /// Ordered SSRCs of the group.
    pub ssrcs: Vec<u32>,
}

/// Single `a=ssrc:<id> <attribute>[:<value>]` line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SsrcLine {
    /// SSRC the attribute belongs to.
    pub ssrc: u32,

    /// Attribute name (`cname`, `msid`, ...).
    pub attribute: String,

    /// Attribute value, when present.
    pub value: Option<String>,
}

/// `a=rtpmap` payload type description.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RtpMap {
    /// Codec name as negotiated (`VP8`, `opus`, `rtx`, ...).
    pub codec: String,

    /// Clock rate of the payload.
    pub clock_rate: u32,

    /// Channel count, for audio payloads.
    pub channels: Option<u8>,
}

/// `a=extmap` header extension declaration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtMap {
    /// Negotiated ID of the extension.
    pub id: u16,

    /// Direction restriction of the extension, when declared.
    pub direction: Option<String>,

    /// URI identifying the extension.
    pub uri: String,
}

/// One media section (m-line and everything up to the next one).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MediaSection {
    /// Kind of the section.
    pub kind: SectionKind,

    /// Port from the m-line.
    pub port: u32,

    /// Transport protocol from the m-line.
    pub protocol: String,

    /// Ordered payload type IDs from the m-line. The order expresses codec
    /// preference.
    pub formats: Vec<String>,

    /// `c=` line value, when present.
    pub connection: Option<String>,

    /// `b=AS:` bandwidth cap in kbps, when present.
    pub bandwidth_as: Option<u32>,

    /// Direction attribute of the section.
    pub direction: Option<Direction>,

    /// `a=mid:` value.
    pub mid: Option<String>,

    /// Media-level `a=msid:` value.
    pub msid: Option<String>,

    /// Payload type descriptions, in declaration order.
    pub rtpmaps: Vec<(String, RtpMap)>,

    /// `a=fmtp:` parameters per payload type.
    pub fmtp: Vec<(String, String)>,

    /// `a=rtcp-fb:` feedback entries per payload type.
    pub rtcp_fb: Vec<(String, String)>,

    /// Header extension declarations.
    pub extmaps: Vec<ExtMap>,

    /// SSRC attribute lines, in declaration order.
    pub ssrc_lines: Vec<SsrcLine>,

    /// SSRC groups, in declaration order.
    pub ssrc_groups: Vec<SsrcGroup>,

    /// Values of all other `a=` lines, in declaration order.
    pub attributes: Vec<String>,

    /// Non-attribute lines this model does not interpret, verbatim.
    pub misc_lines: Vec<String>,
}

impl MediaSection {
    /// Creates an empty section of the provided kind with the given m-line
    /// essentials.
    #[must_use]
    pub fn new(kind: SectionKind, port: u32, protocol: &str) -> Self {
        Self {
            kind,
            port,
            protocol: protocol.to_owned(),
            formats: Vec::new(),
            connection: None,
            bandwidth_as: None,
            direction: None,
            mid: None,
            msid: None,
            rtpmaps: Vec::new(),
            fmtp: Vec::new(),
            rtcp_fb: Vec::new(),
            extmaps: Vec::new(),
            ssrc_lines: Vec::new(),
            ssrc_groups: Vec::new(),
            attributes: Vec::new(),
            misc_lines: Vec::new(),
        }
    }

    /// Returns the [`RtpMap`] of the provided payload type.
    #[must_use]
    pub fn rtpmap(&self, pt: &str) -> Option<&RtpMap> {
        self.rtpmaps.iter().find(|(p, _)| p == pt).map(|(_, m)| m)
    }

    /// Returns the `a=fmtp` parameters of the provided payload type.
    #[must_use]
    pub fn fmtp(&self, pt: &str) -> Option<&str> {
        self.fmtp
            .iter()
            .find(|(p, _)| p == pt)
            .map(|(_, v)| v.as_str())
    }

    /// Returns payload types mapped to the provided codec name
    /// (case-insensitive).
    #[must_use]
    pub fn payloads_of_codec(&self, codec: &str) -> Vec<String> {
        self.rtpmaps
            .iter()
            .filter(|(_, m)| m.codec.eq_ignore_ascii_case(codec))
            .map(|(pt, _)| pt.clone())
            .collect()
    }

    /// Returns RTX payload types whose `apt` points at one of the provided
    /// payload types.
    #[must_use]
    pub fn rtx_payloads_of(&self, primaries: &[String]) -> Vec<String> {
        self.payloads_of_codec("rtx")
            .into_iter()
            .filter(|rtx_pt| {
                self.fmtp(rtx_pt)
                    .and_then(|params| fmtp_param(params, "apt"))
                    .map_or(false, |apt| {
                        primaries.iter().any(|p| p == &apt)
                    })
            })
            .collect()
    }

    /// Returns the effective direction of this section.
    ///
    /// An absent direction attribute means `sendrecv`.
    #[inline]
    #[must_use]
    pub fn direction_or_default(&self) -> Direction {
        self.direction.unwrap_or(Direction::SendRecv)
    }

    /// Returns all distinct SSRCs of this section, in first-seen order.
    #[must_use]
    pub fn distinct_ssrcs(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let lines = self.ssrc_lines.iter().map(|l| l.ssrc);
        let grouped = self.ssrc_groups.iter().flat_map(|g| g.ssrcs.clone());
        for ssrc in lines.chain(grouped) {
            if !out.contains(&ssrc) {
                out.push(ssrc);
            }
        }
        out
    }

    /// Returns primary SSRCs of this section: SIM members when a SIM group
    /// exists, otherwise everything that is not an RTX or FEC pair member.
    #[must_use]
    pub fn primary_ssrcs(&self) -> Vec<u32> {
        if let Some(sim) = self
            .ssrc_groups
            .iter()
            .find(|g| g.semantics == GroupSemantics::Sim)
        {
            return sim.ssrcs.clone();
        }
        let secondary: Vec<u32> = self
            .ssrc_groups
            .iter()
            .filter(|g| {
                matches!(
                    g.semantics,
                    GroupSemantics::Fid | GroupSemantics::FecFr
                )
            })
            .filter_map(|g| g.ssrcs.get(1).copied())
            .collect();
        self.distinct_ssrcs()
            .into_iter()
            .filter(|ssrc| !secondary.contains(ssrc))
            .collect()
    }

    /// Returns the value of the provided attribute of the provided SSRC.
    #[must_use]
    pub fn ssrc_attr(&self, ssrc: u32, attribute: &str) -> Option<&str> {
        self.ssrc_lines
            .iter()
            .find(|l| l.ssrc == ssrc && l.attribute == attribute)
            .and_then(|l| l.value.as_deref())
    }

    /// Returns the `msid` of the provided SSRC, falling back to the
    /// media-level `a=msid`.
    #[must_use]
    pub fn msid_of_ssrc(&self, ssrc: u32) -> Option<&str> {
        self.ssrc_attr(ssrc, "msid").or_else(|| self.msid.as_deref())
    }

    /// Returns the ICE username fragment of this section, when present.
    #[must_use]
    pub fn ice_ufrag(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find_map(|a| a.strip_prefix("ice-ufrag:"))
    }

    /// Returns the extension declaration with the provided URI.
    #[must_use]
    pub fn extmap_by_uri(&self, uri: &str) -> Option<&ExtMap> {
        self.extmaps.iter().find(|e| e.uri == uri)
    }

    /// Removes every payload type in `pts` from this section, along with
    /// its `rtpmap`/`fmtp`/`rtcp-fb` entries.
    pub(crate) fn remove_payloads(&mut self, pts: &[String]) {
        self.formats.retain(|pt| !pts.contains(pt));
        self.rtpmaps.retain(|(pt, _)| !pts.contains(pt));
        self.fmtp.retain(|(pt, _)| !pts.contains(pt));
        self.rtcp_fb.retain(|(pt, _)| !pts.contains(pt));
    }
}

/// Parsed session description: session-level lines plus an ordered list of
/// media sections.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionDescription {
    /// Raw session-level lines (everything before the first m-line),
    /// verbatim.
    pub session: Vec<String>,

    /// Media sections, in declaration order.
    pub media: Vec<MediaSection>,
}

/// Errors of parsing an SDP document.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum ParseError {
    /// A line is not of the `<type>=<value>` shape.
    #[display(fmt = "malformed SDP line: {}", _0)]
    MalformedLine(String),

    /// An m-line misses one of its mandatory fields.
    #[display(fmt = "malformed m-line: {}", _0)]
    MalformedMediaLine(String),

    /// An m-line declares a kind this model does not know.
    #[display(fmt = "unknown media kind: {}", _0)]
    UnknownMediaKind(String),

    /// An SSRC field is not a 32-bit integer.
    #[display(fmt = "malformed SSRC in line: {}", _0)]
    MalformedSsrc(String),

    /// An attribute line cannot be interpreted.
    #[display(fmt = "malformed attribute: {}", _0)]
    MalformedAttribute(String),
}

impl SessionDescription {
    /// Parses an SDP document.
    ///
    /// # Errors
    ///
    /// See [`ParseError`] for every possible failure.
    pub fn parse(sdp: &str) -> Result<Self, ParseError> {
        let mut session = Vec::new();
        let mut media: Vec<MediaSection> = Vec::new();

        for raw in sdp.lines() {
            let line = raw.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (kind, value) = split_line(line)?;

            if kind == 'm' {
                media.push(parse_media_line(value)?);
                continue;
            }
            match media.last_mut() {
                None => session.push(line.to_owned()),
                Some(section) => match kind {
                    'c' => section.connection = Some(value.to_owned()),
                    'b' => {
                        if let Some(kbps) = value
                            .strip_prefix("AS:")
                            .and_then(|v| v.parse().ok())
                        {
                            section.bandwidth_as = Some(kbps);
                        } else {
                            section.misc_lines.push(line.to_owned());
                        }
                    }
                    'a' => parse_media_attribute(section, value)?,
                    _ => section.misc_lines.push(line.to_owned()),
                },
            }
        }

        Ok(Self { session, media })
    }

    /// Returns media sections of the provided kind, in order.
    pub fn media_of_kind(
        &self,
        kind: SectionKind,
    ) -> impl Iterator<Item = &MediaSection> {
        self.media.iter().filter(move |m| m.kind == kind)
    }

    /// Returns the ICE username fragment of this description: the
    /// session-level one, or the first one found in a media section.
    #[must_use]
    pub fn ice_ufrag(&self) -> Option<&str> {
        self.session
            .iter()
            .find_map(|l| l.strip_prefix("a=ice-ufrag:"))
            .or_else(|| self.media.iter().find_map(MediaSection::ice_ufrag))
    }

    /// Rewrites the session-level `a=group:BUNDLE` line to reference the
    /// current set of mids.
    pub(crate) fn rewrite_bundle(&mut self) {
        let mids: Vec<&str> =
            self.media.iter().filter_map(|m| m.mid.as_deref()).collect();
        if mids.is_empty() {
            return;
        }
        let bundle = format!("a=group:BUNDLE {}", mids.join(" "));
        if let Some(line) = self
            .session
            .iter_mut()
            .find(|l| l.starts_with("a=group:BUNDLE"))
        {
            *line = bundle;
        }
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.session {
            write!(f, "{}\r\n", line)?;
        }
        for m in &self.media {
            write!(
                f,
                "m={} {} {} {}\r\n",
                m.kind,
                m.port,
                m.protocol,
                m.formats.join(" "),
            )?;
            if let Some(c) = &m.connection {
                write!(f, "c={}\r\n", c)?;
            }
            if let Some(kbps) = m.bandwidth_as {
                write!(f, "b=AS:{}\r\n", kbps)?;
            }
            for line in &m.misc_lines {
                write!(f, "{}\r\n", line)?;
            }
            if let Some(mid) = &m.mid {
                write!(f, "a=mid:{}\r\n", mid)?;
            }
            for attr in &m.attributes {
                write!(f, "a={}\r\n", attr)?;
            }
            if let Some(direction) = m.direction {
                write!(f, "a={}\r\n", direction)?;
            }
            if let Some(msid) = &m.msid {
                write!(f, "a=msid:{}\r\n", msid)?;
            }
            for (pt, map) in &m.rtpmaps {
                write!(f, "a=rtpmap:{} {}/{}", pt, map.codec, map.clock_rate)?;
                if let Some(ch) = map.channels {
                    write!(f, "/{}", ch)?;
                }
                write!(f, "\r\n")?;
            }
            for (pt, fb) in &m.rtcp_fb {
                write!(f, "a=rtcp-fb:{} {}\r\n", pt, fb)?;
            }
            for (pt, params) in &m.fmtp {
                write!(f, "a=fmtp:{} {}\r\n", pt, params)?;
            }
            for ext in &m.extmaps {
                write!(f, "a=extmap:{}", ext.id)?;
                if let Some(dir) = &ext.direction {
                    write!(f, "/{}", dir)?;
                }
                write!(f, " {}\r\n", ext.uri)?;
            }
            for group in &m.ssrc_groups {
                write!(f, "a=ssrc-group:{}", group.semantics)?;
                for ssrc in &group.ssrcs {
                    write!(f, " {}", ssrc)?;
                }
                write!(f, "\r\n")?;
            }
            for line in &m.ssrc_lines {
                write!(f, "a=ssrc:{} {}", line.ssrc, line.attribute)?;
                if let Some(value) = &line.value {
                    write!(f, ":{}", value)?;
                }
                write!(f, "\r\n")?;
            }
        }
        Ok(())
    }
}

/// Returns the value of the provided key inside an `a=fmtp` parameter
/// string (`key=value;key=value`).
#[must_use]
pub fn fmtp_param(params: &str, key: &str) -> Option<String> {
    params.split(';').find_map(|kv| {
        let mut it = kv.trim().splitn(2, '=');
        (it.next()? == key).then(|| it.next().unwrap_or("").to_owned())
    })
}

/// Upserts the provided key into an `a=fmtp` parameter string, preserving
/// the order of existing parameters.
#[must_use]
pub fn set_fmtp_param(params: &str, key: &str, value: &str) -> String {
    let mut found = false;
    let mut out: Vec<String> = params
        .split(';')
        .filter(|kv| !kv.trim().is_empty())
        .map(|kv| {
            let mut it = kv.trim().splitn(2, '=');
            let k = it.next().unwrap_or("");
            if k == key {
                found = true;
                format!("{}={}", key, value)
            } else {
                kv.trim().to_owned()
            }
        })
        .collect();
    if !found {
        out.push(format!("{}={}", key, value));
    }
    out.join(";")
}

fn split_line(line: &str) -> Result<(char, &str), ParseError> {
    let mut chars = line.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ParseError::MalformedLine(line.to_owned()))?;
    if chars.next() != Some('=') {
        return Err(ParseError::MalformedLine(line.to_owned()));
    }
    Ok((kind, &line[2..]))
}

fn parse_media_line(value: &str) -> Result<MediaSection, ParseError> {
    let mut parts = value.split_whitespace();
    let kind = parts
        .next()
        .ok_or_else(|| ParseError::MalformedMediaLine(value.to_owned()))?;
    let kind = SectionKind::parse(kind)
        .ok_or_else(|| ParseError::UnknownMediaKind(kind.to_owned()))?;
    let port = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| ParseError::MalformedMediaLine(value.to_owned()))?;
    let protocol = parts
        .next()
        .ok_or_else(|| ParseError::MalformedMediaLine(value.to_owned()))?;

    let mut section = MediaSection::new(kind, port, protocol);
    section.formats = parts.map(ToOwned::to_owned).collect();
    Ok(section)
}

fn parse_media_attribute(
    section: &mut MediaSection,
    value: &str,
) -> Result<(), ParseError> {
    let (name, arg) = match value.find(':') {
        Some(at) => (&value[..at], Some(&value[at + 1..])),
        None => (value, None),
    };

    if let Some(direction) = Direction::from_attribute(name) {
        section.direction = Some(direction);
        return Ok(());
    }
    match (name, arg) {
        ("mid", Some(arg)) => section.mid = Some(arg.to_owned()),
        ("msid", Some(arg)) => section.msid = Some(arg.to_owned()),
        ("rtpmap", Some(arg)) => {
            let mut parts = arg.splitn(2, ' ');
            let pt = parts.next().unwrap_or_default().to_owned();
            let spec = parts.next().ok_or_else(|| {
                ParseError::MalformedAttribute(value.to_owned())
            })?;
            let mut spec = spec.split('/');
            let codec = spec
                .next()
                .ok_or_else(|| {
                    ParseError::MalformedAttribute(value.to_owned())
                })?
                .to_owned();
            let clock_rate =
                spec.next().and_then(|c| c.parse().ok()).ok_or_else(
                    || ParseError::MalformedAttribute(value.to_owned()),
                )?;
            let channels = spec.next().and_then(|c| c.parse().ok());
            section.rtpmaps.push((
                pt,
                RtpMap {
                    codec,
                    clock_rate,
                    channels,
                },
            ));
        }
        ("fmtp", Some(arg)) => {
            let mut parts = arg.splitn(2, ' ');
            let pt = parts.next().unwrap_or_default().to_owned();
            let params = parts
                .next()
                .ok_or_else(|| {
                    ParseError::MalformedAttribute(value.to_owned())
                })?
                .to_owned();
            section.fmtp.push((pt, params));
        }
        ("rtcp-fb", Some(arg)) => {
            let mut parts = arg.splitn(2, ' ');
            let pt = parts.next().unwrap_or_default().to_owned();
            let fb = parts
                .next()
                .ok_or_else(|| {
                    ParseError::MalformedAttribute(value.to_owned())
                })?
                .to_owned();
            section.rtcp_fb.push((pt, fb));
        }
        ("extmap", Some(arg)) => {
            let mut parts = arg.splitn(2, ' ');
            let id_part = parts.next().unwrap_or_default();
            let uri = parts
                .next()
                .ok_or_else(|| {
                    ParseError::MalformedAttribute(value.to_owned())
                })?
                .to_owned();
            let mut id_parts = id_part.splitn(2, '/');
            let id = id_parts
                .next()
                .and_then(|i| i.parse().ok())
                .ok_or_else(|| {
                    ParseError::MalformedAttribute(value.to_owned())
                })?;
            let direction = id_parts.next().map(ToOwned::to_owned);
            section.extmaps.push(ExtMap { id, direction, uri });
        }
        ("ssrc", Some(arg)) => {
            let mut parts = arg.splitn(2, ' ');
            let ssrc = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ParseError::MalformedSsrc(value.to_owned()))?;
            let rest = parts.next().ok_or_else(|| {
                ParseError::MalformedAttribute(value.to_owned())
            })?;
            let mut attr_parts = rest.splitn(2, ':');
            let attribute =
                attr_parts.next().unwrap_or_default().to_owned();
            let attr_value = attr_parts.next().map(ToOwned::to_owned);
            section.ssrc_lines.push(SsrcLine {
                ssrc,
                attribute,
                value: attr_value,
            });
        }
        ("ssrc-group", Some(arg)) => {
            let mut parts = arg.split_whitespace();
            let semantics = GroupSemantics::parse(
                parts.next().unwrap_or_default(),
            );
            let ssrcs = parts
                .map(|s| {
                    s.parse().map_err(|_| {
                        ParseError::MalformedSsrc(value.to_owned())
                    })
                })
                .collect::<Result<Vec<u32>, _>>()?;
            section.ssrc_groups.push(SsrcGroup { semantics, ssrcs });
        }
        _ => section.attributes.push(value.to_owned()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=group:BUNDLE audio video\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111 103\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:audio\r\n\
        a=ice-ufrag:someufrag\r\n\
        a=ice-pwd:somepwd\r\n\
        a=sendrecv\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=rtpmap:103 ISAC/16000\r\n\
        a=fmtp:111 minptime=10;useinbandfec=1\r\n\
        a=ssrc:1001 cname:k3yYZ\r\n\
        a=ssrc:1001 msid:stream-a track-a\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 100 96 97\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:video\r\n\
        a=ice-ufrag:someufrag\r\n\
        a=sendrecv\r\n\
        a=rtpmap:100 H264/90000\r\n\
        a=rtpmap:96 VP8/90000\r\n\
        a=rtpmap:97 rtx/90000\r\n\
        a=rtcp-fb:96 nack pli\r\n\
        a=fmtp:97 apt=96\r\n\
        a=extmap:3 http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time\r\n\
        a=ssrc-group:FID 2001 2002\r\n\
        a=ssrc:2001 cname:k3yYZ\r\n\
        a=ssrc:2001 msid:stream-a track-v\r\n\
        a=ssrc:2002 cname:k3yYZ\r\n\
        a=ssrc:2002 msid:stream-a track-v\r\n";

    #[test]
    fn parses_sections_and_attributes() {
        let desc = SessionDescription::parse(OFFER).unwrap();

        assert_eq!(desc.media.len(), 2);
        assert_eq!(desc.media[0].kind, SectionKind::Audio);
        assert_eq!(desc.media[0].formats, vec!["111", "103"]);
        assert_eq!(desc.media[0].mid.as_deref(), Some("audio"));
        assert_eq!(desc.ice_ufrag(), Some("someufrag"));

        let video = &desc.media[1];
        assert_eq!(video.payloads_of_codec("vp8"), vec!["96"]);
        assert_eq!(
            video.rtx_payloads_of(&["96".to_owned()]),
            vec!["97".to_owned()],
        );
        assert_eq!(video.primary_ssrcs(), vec![2001]);
        assert_eq!(video.ssrc_attr(2001, "cname"), Some("k3yYZ"));
        assert_eq!(
            video.msid_of_ssrc(2001),
            Some("stream-a track-v"),
        );
    }

    #[test]
    fn serialization_is_stable() {
        let desc = SessionDescription::parse(OFFER).unwrap();
        let reparsed =
            SessionDescription::parse(&desc.to_string()).unwrap();
        assert_eq!(desc, reparsed);
        assert_eq!(desc.to_string(), reparsed.to_string());
    }

    #[test]
    fn fmtp_params_are_upserted_in_place() {
        let params = "minptime=10;useinbandfec=1";
        assert_eq!(fmtp_param(params, "minptime").as_deref(), Some("10"));
        assert_eq!(
            set_fmtp_param(params, "useinbandfec", "0"),
            "minptime=10;useinbandfec=0",
        );
        assert_eq!(
            set_fmtp_param(params, "stereo", "1"),
            "minptime=10;useinbandfec=1;stereo=1",
        );
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(matches!(
            SessionDescription::parse("nonsense"),
            Err(ParseError::MalformedLine(_)),
        ));
        assert!(matches!(
            SessionDescription::parse("m=telepathy 9 X 0"),
            Err(ParseError::UnknownMediaKind(_)),
        ));
    }
}
