//! Local and remote media tracks.

/// Tracks originating on this endpoint.
pub mod local {
    use std::{cell::Cell, rc::Rc};

    use crate::{
        media::{MediaKind, SourceName, TrackId, VideoType},
        platform,
    };

    /// Media track captured on this endpoint.
    ///
    /// Owned by the capture subsystem; peer connections only hold
    /// references and must not change the capture state behind it.
    pub struct Track {
        /// ID assigned by the coordinator.
        id: TrackId,

        /// Globally unique name of the source this track carries.
        source_name: SourceName,

        /// Media kind of this track.
        kind: MediaKind,

        /// Kind of video this track carries.
        video_type: Cell<VideoType>,

        /// Whether the source is currently muted.
        muted: Cell<bool>,

        /// Captured resolution `(width, height)`, once known.
        captured_resolution: Cell<Option<(u32, u32)>>,

        /// Underlying native track.
        native: Rc<dyn platform::MediaStreamTrack>,
    }

    impl Track {
        /// Creates a new local [`Track`] wrapping the provided native one.
        #[must_use]
        pub fn new(
            id: TrackId,
            source_name: SourceName,
            video_type: VideoType,
            native: Rc<dyn platform::MediaStreamTrack>,
        ) -> Rc<Self> {
            Rc::new(Self {
                id,
                source_name,
                kind: native.kind(),
                video_type: Cell::new(video_type),
                muted: Cell::new(false),
                captured_resolution: Cell::new(None),
                native,
            })
        }

        /// Returns the ID of this track.
        #[inline]
        #[must_use]
        pub fn id(&self) -> TrackId {
            self.id
        }

        /// Returns the source name of this track.
        #[inline]
        #[must_use]
        pub fn source_name(&self) -> &SourceName {
            &self.source_name
        }

        /// Returns the media kind of this track.
        #[inline]
        #[must_use]
        pub fn kind(&self) -> MediaKind {
            self.kind
        }

        /// Returns the current video type of this track.
        #[inline]
        #[must_use]
        pub fn video_type(&self) -> VideoType {
            self.video_type.get()
        }

        /// Updates the video type of this track.
        #[inline]
        pub fn set_video_type(&self, video_type: VideoType) {
            self.video_type.set(video_type);
        }

        /// Indicates whether the source behind this track is muted.
        #[inline]
        #[must_use]
        pub fn is_muted(&self) -> bool {
            self.muted.get()
        }

        /// Updates the mute flag of this track.
        #[inline]
        pub fn set_muted(&self, muted: bool) {
            self.muted.set(muted);
        }

        /// Returns the captured resolution of this track, once the capture
        /// subsystem reported it.
        #[inline]
        #[must_use]
        pub fn captured_resolution(&self) -> Option<(u32, u32)> {
            self.captured_resolution.get()
        }

        /// Records the captured resolution of this track.
        #[inline]
        pub fn set_captured_resolution(&self, width: u32, height: u32) {
            self.captured_resolution.set(Some((width, height)));
        }

        /// Returns the underlying native track.
        #[inline]
        #[must_use]
        pub fn native(&self) -> Rc<dyn platform::MediaStreamTrack> {
            Rc::clone(&self.native)
        }
    }
}

/// Tracks received from other endpoints.
pub mod remote {
    use std::{cell::Cell, rc::Rc};

    use crate::{
        media::{EndpointId, MediaKind, SourceName, VideoType},
        platform,
    };

    /// Media track received from another endpoint.
    pub struct Track {
        /// Endpoint owning the source of this track.
        owner: EndpointId,

        /// Name of the source, when the signalling layer knows it.
        source_name: Option<SourceName>,

        /// Primary SSRC this track was bound to at creation.
        ssrc: u32,

        /// Media kind of this track.
        kind: MediaKind,

        /// Whether the remote source is muted.
        muted: Cell<bool>,

        /// Kind of video the remote source carries.
        video_type: Cell<VideoType>,

        /// Underlying native track of the receiver.
        native: Rc<dyn platform::MediaStreamTrack>,
    }

    impl Track {
        /// Creates a new remote [`Track`].
        #[must_use]
        pub fn new(
            owner: EndpointId,
            source_name: Option<SourceName>,
            ssrc: u32,
            muted: bool,
            video_type: VideoType,
            native: Rc<dyn platform::MediaStreamTrack>,
        ) -> Rc<Self> {
            Rc::new(Self {
                owner,
                source_name,
                ssrc,
                kind: native.kind(),
                muted: Cell::new(muted),
                video_type: Cell::new(video_type),
                native,
            })
        }

        /// Returns the endpoint owning this track's source.
        #[inline]
        #[must_use]
        pub fn owner(&self) -> &EndpointId {
            &self.owner
        }

        /// Returns the source name of this track, when known.
        #[inline]
        #[must_use]
        pub fn source_name(&self) -> Option<&SourceName> {
            self.source_name.as_ref()
        }

        /// Returns the SSRC this track was bound to.
        ///
        /// Stays stable across SSRC remappings until the next description
        /// sync.
        #[inline]
        #[must_use]
        pub fn ssrc(&self) -> u32 {
            self.ssrc
        }

        /// Returns the media kind of this track.
        #[inline]
        #[must_use]
        pub fn kind(&self) -> MediaKind {
            self.kind
        }

        /// Indicates whether the remote source is muted.
        #[inline]
        #[must_use]
        pub fn is_muted(&self) -> bool {
            self.muted.get()
        }

        /// Updates the mute flag of this track.
        #[inline]
        pub fn set_muted(&self, muted: bool) {
            self.muted.set(muted);
        }

        /// Returns the video type of the remote source.
        #[inline]
        #[must_use]
        pub fn video_type(&self) -> VideoType {
            self.video_type.get()
        }

        /// Updates the video type of the remote source.
        #[inline]
        pub fn set_video_type(&self, video_type: VideoType) {
            self.video_type.set(video_type);
        }

        /// Returns the ID of the underlying native track.
        #[must_use]
        pub fn native_id(&self) -> String {
            self.native.id()
        }

        /// Returns the underlying native track.
        #[inline]
        #[must_use]
        pub fn native(&self) -> Rc<dyn platform::MediaStreamTrack> {
            Rc::clone(&self.native)
        }
    }
}
