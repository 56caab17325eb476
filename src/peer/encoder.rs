//! Encoder configuration policy for sending video.
//!
//! Given the negotiated codec, the kind of video and the receiver's
//! height preference, this module decides what each simulcast layer (or
//! the single SVC encoding) looks like. The result is merged into the
//! native sender parameters by the owning peer connection.

use crate::{
    media::{Codec, VideoQualitySettings, VideoType},
    platform::{DegradationPreference, SendEncodingParameters},
};

/// Downscale factors of the simulcast layers, lowest layer first.
pub const SIMULCAST_SCALE_FACTORS: [f64; 3] = [4.0, 2.0, 1.0];

/// Smallest layer height still worth encoding.
const MIN_LAYER_HEIGHT: u32 = 90;

/// Inputs of one encoder policy decision.
#[derive(Clone, Debug)]
pub struct EncoderRequest {
    /// Codec negotiated for the source.
    pub codec: Codec,

    /// Kind of video the source carries.
    pub video_type: VideoType,

    /// Height the source is captured at.
    pub captured_height: u32,

    /// Maximum height the receiver side asked for. `0` deactivates all
    /// layers.
    pub max_height: u32,

    /// Whether simulcast sending is enabled for the session.
    pub simulcast: bool,

    /// Whether screen-sharing is forced into the capped low-fps mode.
    pub cap_screenshare_bitrate: bool,

    /// Whether the native stack supports scalability-mode selection.
    pub supports_scalability_mode: bool,
}

/// Outcome of the policy: the encodings vector plus the sender-wide
/// degradation preference.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodingsPlan {
    /// Per-encoding parameters, lowest layer first.
    pub encodings: Vec<SendEncodingParameters>,

    /// Degradation preference of the sender.
    pub degradation_preference: DegradationPreference,
}

impl EncodingsPlan {
    /// Returns the height of the highest active layer, if any layer is
    /// active at all.
    #[must_use]
    pub fn max_enabled_height(&self, captured_height: u32) -> Option<u32> {
        self.encodings
            .iter()
            .filter(|enc| enc.active)
            .map(|enc| {
                enc.scale_resolution_down_by.map_or(
                    captured_height,
                    |scale| (f64::from(captured_height) / scale) as u32,
                )
            })
            .max()
    }
}

/// Computes the encoder configuration of a video source.
#[must_use]
pub fn compute_encodings(
    request: &EncoderRequest,
    quality: &VideoQualitySettings,
) -> EncodingsPlan {
    let table = quality.table(request.codec);

    // Low-fps screen-sharing sends a single capped encoding and trades
    // frame rate for legible resolution.
    if request.video_type == VideoType::Desktop
        && request.cap_screenshare_bitrate
    {
        return EncodingsPlan {
            encodings: vec![SendEncodingParameters {
                rid: None,
                active: request.max_height > 0,
                max_bitrate: Some(table.ss_high),
                scale_resolution_down_by: Some(1.0),
                scalability_mode: scalability_mode(request, 1),
            }],
            degradation_preference: DegradationPreference::MaintainResolution,
        };
    }

    let multi_stream = request.simulcast
        && (request.codec == Codec::Vp8
            || (request.codec == Codec::H264
                && request.supports_scalability_mode));
    let svc = request.simulcast && request.codec.is_svc_capable();

    let encodings = if multi_stream {
        SIMULCAST_SCALE_FACTORS
            .iter()
            .map(|scale| {
                let height =
                    (f64::from(request.captured_height) / scale) as u32;
                SendEncodingParameters {
                    rid: None,
                    active: height >= MIN_LAYER_HEIGHT
                        && height <= request.max_height,
                    max_bitrate: Some(table.for_height(height)),
                    scale_resolution_down_by: Some(*scale),
                    scalability_mode: scalability_mode(request, 1),
                }
            })
            .collect()
    } else {
        let target = request.captured_height.min(request.max_height.max(1));
        let scale = f64::from(request.captured_height) / f64::from(target);
        let max_bitrate = if request.video_type == VideoType::Desktop {
            table.ss_high
        } else {
            table.for_height(target)
        };
        vec![SendEncodingParameters {
            rid: None,
            active: request.max_height > 0,
            max_bitrate: Some(max_bitrate),
            scale_resolution_down_by: Some(scale.max(1.0)),
            scalability_mode: scalability_mode(
                request,
                if svc { 3 } else { 1 },
            ),
        }]
    };

    EncodingsPlan {
        encodings,
        degradation_preference: DegradationPreference::MaintainFramerate,
    }
}

/// Picks the scalability mode of one encoding, when the stack supports
/// selecting one.
///
/// SVC codecs run three spatial layers with keyframe-only upper layers;
/// everything else sticks to three temporal layers.
fn scalability_mode(
    request: &EncoderRequest,
    spatial_layers: usize,
) -> Option<String> {
    if !request.supports_scalability_mode {
        return None;
    }
    Some(if spatial_layers > 1 {
        format!("L{}T3_KEY", spatial_layers)
    } else {
        "L1T3".to_owned()
    })
}

#[cfg(test)]
mod tests {
    use crate::media::VideoQualitySettings;

    use super::*;

    fn request() -> EncoderRequest {
        EncoderRequest {
            codec: Codec::Vp8,
            video_type: VideoType::Camera,
            captured_height: 720,
            max_height: 2160,
            simulcast: true,
            cap_screenshare_bitrate: false,
            supports_scalability_mode: false,
        }
    }

    #[test]
    fn camera_simulcast_yields_three_layers() {
        let quality = VideoQualitySettings::default();
        let plan = compute_encodings(&request(), &quality);

        assert_eq!(plan.encodings.len(), 3);
        assert_eq!(
            plan.degradation_preference,
            DegradationPreference::MaintainFramerate,
        );
        let scales: Vec<f64> = plan
            .encodings
            .iter()
            .map(|e| e.scale_resolution_down_by.unwrap())
            .collect();
        assert_eq!(scales, vec![4.0, 2.0, 1.0]);
        assert!(plan.encodings.iter().all(|e| e.active));
        assert_eq!(plan.encodings[0].max_bitrate, Some(quality.vp8.low));
        assert_eq!(plan.encodings[2].max_bitrate, Some(quality.vp8.high));
        assert_eq!(plan.max_enabled_height(720), Some(720));
    }

    #[test]
    fn requested_height_deactivates_upper_layers() {
        let quality = VideoQualitySettings::default();
        let mut req = request();
        req.max_height = 180;
        let plan = compute_encodings(&req, &quality);

        let active: Vec<bool> =
            plan.encodings.iter().map(|e| e.active).collect();
        assert_eq!(active, vec![true, false, false]);
        assert_eq!(plan.max_enabled_height(720), Some(180));
    }

    #[test]
    fn zero_height_deactivates_everything() {
        let quality = VideoQualitySettings::default();
        let mut req = request();
        req.max_height = 0;
        let plan = compute_encodings(&req, &quality);
        assert!(plan.encodings.iter().all(|e| !e.active));
        assert_eq!(plan.max_enabled_height(720), None);
    }

    #[test]
    fn low_fps_screenshare_sends_one_capped_encoding() {
        let quality = VideoQualitySettings::default();
        let mut req = request();
        req.video_type = VideoType::Desktop;
        req.cap_screenshare_bitrate = true;
        req.max_height = 1080;
        req.captured_height = 1080;
        let plan = compute_encodings(&req, &quality);

        assert_eq!(plan.encodings.len(), 1);
        let enc = &plan.encodings[0];
        assert!(enc.active);
        assert_eq!(enc.scale_resolution_down_by, Some(1.0));
        assert_eq!(enc.max_bitrate, Some(quality.vp8.ss_high));
        assert_eq!(
            plan.degradation_preference,
            DegradationPreference::MaintainResolution,
        );
    }

    #[test]
    fn svc_codec_sends_a_single_scalable_encoding() {
        let quality = VideoQualitySettings::default();
        let mut req = request();
        req.codec = Codec::Vp9;
        req.supports_scalability_mode = true;
        let plan = compute_encodings(&req, &quality);

        assert_eq!(plan.encodings.len(), 1);
        assert_eq!(
            plan.encodings[0].scalability_mode.as_deref(),
            Some("L3T3_KEY"),
        );
        assert_eq!(plan.encodings[0].scale_resolution_down_by, Some(1.0));
    }
}
