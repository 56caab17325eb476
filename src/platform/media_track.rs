//! Native media track handle.

use crate::media::MediaKind;

/// Handle to a native media track, local or remote.
///
/// The core never starts or stops capture; it only attaches, detaches and
/// identifies tracks through this handle.
#[cfg_attr(feature = "mockable", mockall::automock)]
pub trait MediaStreamTrack {
    /// Returns the unique ID of this track, stable for its lifetime.
    fn id(&self) -> String;

    /// Returns the media kind this track carries.
    fn kind(&self) -> MediaKind;
}
