use std::rc::Rc;

use futures::StreamExt as _;

use crate::{
    media::{Codec, MediaKind, SourceName},
    options::RtcOptions,
    platform::{self, SdpType, TransceiverDirection},
    sdp::GroupSemantics,
    testing::{
        self, drain_stream, local_audio_track, local_video_track, FakePeer,
        FakeSignaling, FakeTrack, FakeTransceiver,
    },
};

use super::{PeerConnection, PeerError, PeerEvent, PeerId};

const NATIVE_OFFER: &str = "v=0\r\n\
    o=- 1 2 IN IP4 127.0.0.1\r\n\
    s=-\r\n\
    t=0 0\r\n\
    a=group:BUNDLE 0 1\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
    a=mid:0\r\n\
    a=ice-ufrag:f00\r\n\
    a=sendrecv\r\n\
    a=rtpmap:111 opus/48000/2\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 100 96 97\r\n\
    a=mid:1\r\n\
    a=ice-ufrag:f00\r\n\
    a=sendrecv\r\n\
    a=rtpmap:100 H264/90000\r\n\
    a=rtpmap:96 VP8/90000\r\n\
    a=rtpmap:97 rtx/90000\r\n\
    a=fmtp:97 apt=96\r\n\
    a=ssrc:2001 cname:argo\r\n\
    a=ssrc:2001 msid:stream video0\r\n";

const REMOTE_OFFER: &str = "v=0\r\n\
    o=- 9 2 IN IP4 127.0.0.1\r\n\
    s=-\r\n\
    t=0 0\r\n\
    a=group:BUNDLE 1\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
    a=mid:1\r\n\
    a=ice-ufrag:remote\r\n\
    a=sendonly\r\n\
    a=rtpmap:96 VP8/90000\r\n\
    a=ssrc:5001 cname:bob\r\n\
    a=ssrc:5001 msid:remote-stream v0\r\n";

fn vp8_options() -> RtcOptions {
    let mut options = RtcOptions::default();
    options.codec_settings.codec_list = vec![Codec::Vp8];
    options
}

fn make_peer(
    native: &Rc<FakePeer>,
    signaling: &Rc<FakeSignaling>,
    options: RtcOptions,
    is_p2p: bool,
) -> Rc<PeerConnection> {
    PeerConnection::new(
        PeerId(1),
        Rc::clone(native) as Rc<dyn platform::RtcPeerConnection>,
        Rc::clone(signaling) as Rc<dyn crate::signaling::SignalingLayer>,
        Rc::new(options),
        is_p2p,
    )
}

#[test]
fn simulcast_offer_carries_three_fid_pairs_and_a_sim_group() {
    testing::run(async {
        let native = FakePeer::new();
        *native.offer_sdp.borrow_mut() = NATIVE_OFFER.to_owned();
        let signaling = FakeSignaling::new();
        let peer = make_peer(&native, &signaling, vp8_options(), false);

        peer.add_track(local_video_track(1, "alice-v0")).await.unwrap();
        let offer = peer.create_offer().await.unwrap();
        peer.set_local_description(SdpType::Offer(offer.to_string()))
            .await
            .unwrap();

        let local = peer.local_description().unwrap();
        let video = &local.media[1];
        // VP8 and its RTX lead the payload list.
        assert_eq!(video.formats[..2], ["96".to_owned(), "97".to_owned()]);

        let sim: Vec<_> = video
            .ssrc_groups
            .iter()
            .filter(|g| g.semantics == GroupSemantics::Sim)
            .collect();
        let fids: Vec<_> = video
            .ssrc_groups
            .iter()
            .filter(|g| g.semantics == GroupSemantics::Fid)
            .collect();
        assert_eq!(sim.len(), 1);
        assert_eq!(sim[0].ssrcs.len(), 3);
        assert_eq!(sim[0].ssrcs[0], 2001);
        assert_eq!(fids.len(), 3);
        assert_eq!(video.distinct_ssrcs().len(), 6);
        // SIM precedes the FID groups.
        assert_eq!(video.ssrc_groups[0].semantics, GroupSemantics::Sim);
    });
}

#[test]
fn adding_an_attached_track_is_rejected() {
    testing::run(async {
        let native = FakePeer::new();
        let signaling = FakeSignaling::new();
        let peer = make_peer(&native, &signaling, vp8_options(), false);

        let track = local_video_track(1, "alice-v0");
        peer.add_track(Rc::clone(&track)).await.unwrap();
        match peer.add_track(track).await {
            Err(e) => assert!(matches!(
                e.into_inner(),
                PeerError::TrackAlreadyAttached(_),
            )),
            Ok(()) => panic!("double attach must fail"),
        }
    });
}

#[test]
fn remote_track_is_bound_to_its_owner() {
    testing::run(async {
        let native = FakePeer::new();
        let signaling = FakeSignaling::new();
        signaling.add_source(5001, "bob", "bob-v0");
        let peer = make_peer(&native, &signaling, vp8_options(), false);
        let mut events = peer.subscribe();

        peer.set_remote_description(SdpType::Offer(REMOTE_OFFER.to_owned()))
            .await
            .unwrap();

        let transceiver = FakeTransceiver::new(MediaKind::Video, Some("1"));
        let event = platform::TrackEvent {
            track: FakeTrack::new("nat-recv-1", MediaKind::Video),
            stream_ids: vec!["remote-stream".to_owned()],
            transceiver,
        };
        native.fire_track(event);

        match events.next().await.unwrap() {
            PeerEvent::RemoteTrackAdded { track, .. } => {
                assert_eq!(track.owner().0, "bob");
                assert_eq!(
                    track.source_name().map(|s| s.0.clone()),
                    Some("bob-v0".to_owned()),
                );
                assert_eq!(track.ssrc(), 5001);
                // No presence info: defaults to muted camera.
                assert!(track.is_muted());
            }
            _ => panic!("expected RemoteTrackAdded"),
        }

        // The same native track arriving again is deduplicated.
        let transceiver = FakeTransceiver::new(MediaKind::Video, Some("1"));
        native.fire_track(platform::TrackEvent {
            track: FakeTrack::new("nat-recv-1", MediaKind::Video),
            stream_ids: vec!["remote-stream".to_owned()],
            transceiver,
        });
        assert!(drain_stream(&mut events).is_empty());
    });
}

#[test]
fn mixed_stream_tracks_are_ignored() {
    testing::run(async {
        let native = FakePeer::new();
        let signaling = FakeSignaling::new();
        let peer = make_peer(&native, &signaling, vp8_options(), false);
        let mut events = peer.subscribe();

        let transceiver = FakeTransceiver::new(MediaKind::Audio, None);
        native.fire_track(platform::TrackEvent {
            track: FakeTrack::new("mixed-1", MediaKind::Audio),
            stream_ids: vec!["mixedmslabel".to_owned()],
            transceiver,
        });
        assert!(drain_stream(&mut events).is_empty());
    });
}

#[test]
fn sender_updates_are_serialized_and_ordered() {
    testing::run(async {
        let native = FakePeer::new();
        let signaling = FakeSignaling::new();
        let peer = make_peer(&native, &signaling, vp8_options(), false);

        peer.add_track(local_video_track(1, "alice-v0")).await.unwrap();
        let source = SourceName::from("alice-v0");

        // Both run through the per-connection queue: the fake sender
        // panics on overlap.
        let (first, second) = futures::join!(
            peer.set_sender_video_constraints(&source, 360),
            peer.set_sender_video_constraints(&source, 720),
        );
        first.unwrap();
        second.unwrap();

        let sender = &native.transceivers.borrow()[0].sender;
        // add_track applied one update, the two explicit calls two more.
        assert_eq!(sender.set_parameters_calls.get(), 3);
        // The last write wins: 720p re-enables the top layer.
        let params = sender.params.borrow();
        assert!(params.encodings[2].active);
    });
}

#[test]
fn failed_sender_update_does_not_poison_the_chain() {
    testing::run(async {
        let native = FakePeer::new();
        let signaling = FakeSignaling::new();
        let peer = make_peer(&native, &signaling, vp8_options(), false);

        peer.add_track(local_video_track(1, "alice-v0")).await.unwrap();
        let source = SourceName::from("alice-v0");

        native.transceivers.borrow()[0].sender.fail_next.set(true);
        match peer.set_sender_video_constraints(&source, 360).await {
            Err(e) => assert!(matches!(
                e.into_inner(),
                PeerError::SenderParametersRejected(_),
            )),
            Ok(()) => panic!("update must fail"),
        }
        peer.set_sender_video_constraints(&source, 720).await.unwrap();
    });
}

#[test]
fn updates_for_muted_sources_wait_for_unmute() {
    testing::run(async {
        let native = FakePeer::new();
        let signaling = FakeSignaling::new();
        let peer = make_peer(&native, &signaling, vp8_options(), false);

        let track = local_video_track(1, "alice-v0");
        peer.add_track(Rc::clone(&track)).await.unwrap();
        let sender = Rc::clone(&native.transceivers.borrow()[0].sender);
        let calls_before = sender.set_parameters_calls.get();

        track.set_muted(true);
        let source = SourceName::from("alice-v0");
        peer.set_sender_video_constraints(&source, 180).await.unwrap();
        assert_eq!(sender.set_parameters_calls.get(), calls_before);

        track.set_muted(false);
        peer.on_source_unmuted(&source).await.unwrap();
        assert_eq!(sender.set_parameters_calls.get(), calls_before + 1);
        assert!(!sender.params.borrow().encodings[2].active);
    });
}

#[test]
fn ice_candidates_are_buffered_until_remote_description() {
    testing::run(async {
        let native = FakePeer::new();
        let signaling = FakeSignaling::new();
        let peer = make_peer(&native, &signaling, vp8_options(), false);

        let candidate = platform::IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.2 50000 typ host"
                .to_owned(),
            sdp_m_line_index: Some(0),
            sdp_mid: Some("1".to_owned()),
        };
        peer.add_ice_candidate(candidate.clone()).await.unwrap();
        assert!(native.candidates.borrow().is_empty());

        peer.set_remote_description(SdpType::Offer(REMOTE_OFFER.to_owned()))
            .await
            .unwrap();
        assert_eq!(native.candidates.borrow().as_slice(), &[candidate]);
    });
}

#[test]
fn close_removes_remote_tracks_and_is_idempotent() {
    testing::run(async {
        let native = FakePeer::new();
        let signaling = FakeSignaling::new();
        signaling.add_source(5001, "bob", "bob-v0");
        let peer = make_peer(&native, &signaling, vp8_options(), false);
        let mut events = peer.subscribe();

        peer.set_remote_description(SdpType::Offer(REMOTE_OFFER.to_owned()))
            .await
            .unwrap();
        let transceiver = FakeTransceiver::new(MediaKind::Video, Some("1"));
        native.fire_track(platform::TrackEvent {
            track: FakeTrack::new("nat-recv-1", MediaKind::Video),
            stream_ids: vec!["remote-stream".to_owned()],
            transceiver,
        });
        drop(drain_stream(&mut events));

        peer.close();
        peer.close();

        let removed = drain_stream(&mut events)
            .into_iter()
            .filter(|e| matches!(e, PeerEvent::RemoteTrackRemoved { .. }))
            .count();
        assert_eq!(removed, 1);
        assert!(native.closed.get());

        match peer.create_offer().await {
            Err(e) => assert!(matches!(
                e.into_inner(),
                PeerError::TransportClosed,
            )),
            Ok(_) => panic!("closed connection must refuse offers"),
        }
    });
}

#[test]
fn pause_falls_back_to_direction_flips_without_encoding_support() {
    testing::run(async {
        let native = FakePeer::new();
        native.per_encoding_activation.set(false);
        let signaling = FakeSignaling::new();
        let peer = make_peer(&native, &signaling, vp8_options(), false);

        peer.add_track(local_video_track(1, "alice-v0")).await.unwrap();
        peer.set_video_transfer_active(false).await.unwrap();

        let transceiver = &native.transceivers.borrow()[0];
        assert!(!transceiver
            .direction
            .get()
            .contains(TransceiverDirection::SEND));

        peer.set_video_transfer_active(true).await.unwrap();
        let transceiver = &native.transceivers.borrow()[0];
        assert!(transceiver
            .direction
            .get()
            .contains(TransceiverDirection::SEND));
    });
}

#[test]
fn start_silent_sessions_attach_audio_without_sending() {
    testing::run(async {
        let native = FakePeer::new();
        native.per_encoding_activation.set(false);
        let signaling = FakeSignaling::new();
        let mut options = vp8_options();
        options.start_silent = true;
        let peer = make_peer(&native, &signaling, options, false);

        peer.add_track(local_audio_track(1, "alice-a0")).await.unwrap();
        let transceiver = &native.transceivers.borrow()[0];
        assert!(!transceiver
            .direction
            .get()
            .contains(TransceiverDirection::SEND));

        peer.set_audio_transfer_active(true).await.unwrap();
        let transceiver = &native.transceivers.borrow()[0];
        assert!(transceiver
            .direction
            .get()
            .contains(TransceiverDirection::SEND));
    });
}

#[test]
fn signaling_mute_changes_reach_remote_tracks() {
    testing::run(async {
        let native = FakePeer::new();
        let signaling = FakeSignaling::new();
        signaling.add_source(5001, "bob", "bob-v0");
        let peer = make_peer(&native, &signaling, vp8_options(), false);
        let mut events = peer.subscribe();

        peer.set_remote_description(SdpType::Offer(REMOTE_OFFER.to_owned()))
            .await
            .unwrap();
        let transceiver = FakeTransceiver::new(MediaKind::Video, Some("1"));
        native.fire_track(platform::TrackEvent {
            track: FakeTrack::new("nat-recv-1", MediaKind::Video),
            stream_ids: vec!["remote-stream".to_owned()],
            transceiver,
        });
        let track = match events.next().await.unwrap() {
            PeerEvent::RemoteTrackAdded { track, .. } => track,
            _ => panic!("expected RemoteTrackAdded"),
        };
        assert!(track.is_muted());

        signaling.push_source_muted("bob-v0", false);
        platform::delay_for(std::time::Duration::from_millis(1)).await;
        assert!(!track.is_muted());
    });
}
