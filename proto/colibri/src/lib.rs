//! Bridge channel protocol implementation for Argo SFU client core.
//!
//! Every frame exchanged with the SFU over the bridge channel is a UTF-8
//! JSON object discriminated by its `colibriClass` field. This crate models
//! the known classes as a tagged [`ColibriMessage`] enum and provides
//! [`InboundMessage::parse()`] for decoding frames whose class may be
//! unknown to this crate.

#![deny(broken_intra_doc_links)]

use std::collections::HashMap;

use derive_more::{Display, From};
use serde::{de::Deserializer, Deserialize, Serialize};
use serde_json::Value;

/// ID of a conference participant, unique within a session.
#[derive(
    Clone, Debug, Display, Eq, From, Hash, PartialEq, Serialize, Deserialize,
)]
#[from(forward)]
pub struct EndpointId(pub String);

/// Stable identifier of a media source, scoped to a session.
///
/// Built as `<endpoint>-<kind><index>` (e.g. `alice-v0`) so it stays unique
/// across all participants.
#[derive(
    Clone, Debug, Display, Eq, From, Hash, PartialEq, Serialize, Deserialize,
)]
#[from(forward)]
pub struct SourceName(pub String);

/// Kind of video a source carries.
#[derive(
    Clone, Copy, Debug, Display, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    /// Camera capture.
    #[display(fmt = "camera")]
    Camera,

    /// Display/window capture.
    #[display(fmt = "desktop")]
    Desktop,

    /// Source stopped sending video.
    #[display(fmt = "none")]
    None,
}

/// Per-source video constraint carried in [`ReceiverVideoConstraints`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VideoConstraint {
    /// Preferred maximum height of the source, in pixels.
    #[serde(rename = "maxHeight")]
    pub max_height: u32,
}

/// Authoritative receiver-side video preferences of an endpoint.
///
/// The most recently supplied value is cached by the sender and replayed
/// exactly once whenever the bridge channel (re)opens.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReceiverVideoConstraints {
    /// Per-receiver cap on the number of forwarded video sources.
    ///
    /// `-1` lifts the cap, `0` asks for no video at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_n: Option<i32>,

    /// Constraint applied to sources not listed in
    /// [`ReceiverVideoConstraints::constraints`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_constraints: Option<VideoConstraint>,

    /// Per-source constraints, keyed by source name.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub constraints: HashMap<SourceName, VideoConstraint>,

    /// Sources currently on stage at the receiver.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub on_stage_sources: Vec<SourceName>,

    /// Sources explicitly selected by the receiver.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selected_sources: Vec<SourceName>,
}

/// Self stats report of an endpoint, relayed by the SFU to every other
/// participant.
///
/// The payload shape is owned by the application, so everything besides the
/// sender is kept as raw JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    /// Endpoint the report originates from. Absent on outbound reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<EndpointId>,

    /// Application-defined stats blob.
    #[serde(flatten)]
    pub stats: serde_json::Map<String, Value>,
}

/// One entry of a [`ColibriMessage::VideoSourcesMap`] or
/// [`ColibriMessage::AudioSourcesMap`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MappedSource {
    /// Name of the remapped source.
    pub source: SourceName,

    /// Endpoint owning the source, when the SFU reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<EndpointId>,

    /// Primary SSRC the source is carried on after the remap.
    pub ssrc: u32,

    /// RTX SSRC paired with [`MappedSource::ssrc`], if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtx: Option<u32>,
}

/// Messages flowing over the bridge channel in either direction.
///
/// The wire form of every variant is a JSON object whose `colibriClass`
/// field equals the variant name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "colibriClass")]
pub enum ColibriMessage {
    /// Datagram from one endpoint to another (or to all, when `to` is
    /// empty).
    EndpointMessage {
        /// Sender of the datagram. Filled by the SFU on delivery.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<EndpointId>,

        /// Receiver of the datagram. An empty ID broadcasts to the whole
        /// conference.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<EndpointId>,

        /// Application-defined payload.
        #[serde(rename = "msgPayload")]
        msg_payload: Value,
    },

    /// Periodic self stats report of an endpoint.
    EndpointStats(EndpointStats),

    /// Receiver's `lastN` preference changed.
    LastNChangedEvent {
        /// New `lastN` value. `-1` is unlimited, `0` receives no video.
        #[serde(rename = "lastN")]
        last_n: i32,
    },

    /// Receiver's "on-stage" endpoints hint.
    SelectedEndpointsChangedEvent {
        /// Endpoints currently considered on stage.
        #[serde(rename = "selectedEndpoints")]
        selected_endpoints: Vec<EndpointId>,
    },

    /// Authoritative per-source receive preferences.
    ReceiverVideoConstraints(ReceiverVideoConstraints),

    /// Declares the video type of a local source.
    SourceVideoTypeMessage {
        /// Source the declaration applies to.
        #[serde(rename = "sourceName")]
        source_name: SourceName,

        /// New video type of the source.
        #[serde(rename = "videoType")]
        video_type: VideoType,
    },

    /// The SFU detected a dominant speaker change.
    DominantSpeakerEndpointChangeEvent {
        /// Endpoint that became the dominant speaker.
        #[serde(rename = "dominantSpeakerEndpoint")]
        dominant_speaker_endpoint: EndpointId,

        /// Previous dominant speakers, most recent first.
        #[serde(default, rename = "previousSpeakers")]
        previous_speakers: Vec<EndpointId>,

        /// Whether the dominant speaker change is into silence.
        #[serde(default)]
        silence: bool,
    },

    /// Connectivity of another endpoint changed, as seen by the SFU.
    EndpointConnectivityStatusChangeEvent {
        /// Affected endpoint.
        endpoint: EndpointId,

        /// Whether the endpoint is reachable.
        #[serde(deserialize_with = "bool_or_string")]
        active: bool,
    },

    /// The set of sources the SFU currently forwards to this endpoint.
    ForwardedSources {
        /// Names of the forwarded sources.
        #[serde(rename = "forwardedSources")]
        forwarded_sources: Vec<SourceName>,
    },

    /// The SFU asks a sender to cap one of its sources.
    SenderSourceConstraints {
        /// Source the constraint applies to.
        #[serde(rename = "sourceName")]
        source_name: SourceName,

        /// Maximum height the SFU is willing to forward.
        #[serde(rename = "maxHeight")]
        max_height: u32,
    },

    /// Greeting sent by the SFU right after the channel opens.
    ServerHello {
        /// SFU version, when reported.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    /// SSRC remapping of video sources forwarded to this endpoint.
    VideoSourcesMap {
        /// Remapped sources.
        #[serde(rename = "mappedSources")]
        mapped_sources: Vec<MappedSource>,
    },

    /// SSRC remapping of audio sources forwarded to this endpoint.
    AudioSourcesMap {
        /// Remapped sources.
        #[serde(rename = "mappedSources")]
        mapped_sources: Vec<MappedSource>,
    },
}

/// Inbound bridge channel frame, decoded up to its `colibriClass`.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    /// A class modelled by [`ColibriMessage`].
    Known(ColibriMessage),

    /// Valid JSON object with a `colibriClass` this crate does not model.
    Other {
        /// The unrecognized class.
        class: String,

        /// The whole frame, untouched.
        payload: Value,
    },
}

impl InboundMessage {
    /// Parses a raw channel frame.
    ///
    /// # Errors
    ///
    /// - [`ParseError::InvalidJson`] when the frame is not valid JSON;
    /// - [`ParseError::MissingClass`] when it lacks a string `colibriClass`.
    pub fn parse(frame: &str) -> Result<Self, ParseError> {
        let raw: Value =
            serde_json::from_str(frame).map_err(ParseError::InvalidJson)?;
        let class = raw
            .get("colibriClass")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingClass)?
            .to_owned();

        match serde_json::from_value::<ColibriMessage>(raw.clone()) {
            Ok(msg) => Ok(Self::Known(msg)),
            Err(_) => Ok(Self::Other {
                class,
                payload: raw,
            }),
        }
    }
}

/// Errors of parsing an inbound bridge channel frame.
#[derive(Debug, Display)]
pub enum ParseError {
    /// Frame is not a valid JSON document.
    #[display(fmt = "frame is not valid JSON: {}", _0)]
    InvalidJson(serde_json::Error),

    /// Frame carries no string `colibriClass` discriminator.
    #[display(fmt = "frame lacks a `colibriClass` field")]
    MissingClass,
}

/// Deserializes a [`bool`] that some SFU versions encode as the strings
/// `"true"`/`"false"`.
fn bool_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Bool(bool),
        Str(String),
    }

    match Repr::deserialize(d)? {
        Repr::Bool(b) => Ok(b),
        Repr::Str(s) => Ok(s == "true"),
    }
}
