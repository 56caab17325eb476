//! Contract of the external signalling layer this core consumes.
//!
//! Session negotiation itself (offers, answers, presence) lives outside
//! this crate; the core only needs the lookups and change notifications
//! below to bind remote tracks to their owners and keep their state
//! current.

use futures::stream::LocalBoxStream;

use crate::media::{EndpointId, MediaKind, SourceName, VideoType};

/// Presence-derived state of a single remote source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PeerMediaInfo {
    /// Whether the source is muted.
    pub muted: bool,

    /// Kind of video the source carries.
    pub video_type: VideoType,
}

impl Default for PeerMediaInfo {
    /// Remote sources are assumed muted camera until presence says
    /// otherwise.
    fn default() -> Self {
        Self {
            muted: true,
            video_type: VideoType::Camera,
        }
    }
}

/// Lookups and notifications the signalling layer provides to the core.
#[cfg_attr(feature = "mockable", mockall::automock)]
pub trait SignalingLayer {
    /// Returns the endpoint announcing the provided SSRC.
    fn ssrc_owner(&self, ssrc: u32) -> Option<EndpointId>;

    /// Returns the source name the provided SSRC is announced under.
    fn track_source_name(&self, ssrc: u32) -> Option<SourceName>;

    /// Returns the presence-derived info of the provided remote source.
    fn peer_media_info(
        &self,
        endpoint: &EndpointId,
        kind: MediaKind,
        source_name: Option<&SourceName>,
    ) -> Option<PeerMediaInfo>;

    /// Mute changes of remote endpoints, per media kind.
    fn on_peer_muted_changed(
        &self,
    ) -> LocalBoxStream<'static, (EndpointId, MediaKind, bool)>;

    /// Video type changes of remote endpoints.
    fn on_peer_video_type_changed(
        &self,
    ) -> LocalBoxStream<'static, (EndpointId, VideoType)>;

    /// Mute changes of individual remote sources.
    fn on_source_muted_changed(
        &self,
    ) -> LocalBoxStream<'static, (SourceName, bool)>;

    /// Video type changes of individual remote sources.
    fn on_source_video_type_changed(
        &self,
    ) -> LocalBoxStream<'static, (SourceName, VideoType)>;
}
