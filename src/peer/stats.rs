//! Periodic statistics collection and normalization.
//!
//! Two loops poll the native stats of one peer connection: a fast one
//! surfacing per-SSRC audio levels and a slow one diffing counters into
//! [`StatsSnapshot`]s (bandwidth, bitrates, packet loss, resolutions,
//! transport pairs).

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    rc::{Rc, Weak},
    time::{Duration, SystemTime},
};

use futures::{channel::mpsc, stream::LocalBoxStream};

use crate::platform::{self, RtcStat};

/// Cadence of the audio-level loop.
pub const AUDIO_LEVEL_INTERVAL: Duration = Duration::from_millis(200);

/// Cadence of the connection-stats loop.
pub const CONNECTION_STATS_INTERVAL: Duration = Duration::from_secs(2);

/// Kilobit-per-second pair, one value per direction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Kbps {
    /// Receive direction.
    pub download: u64,

    /// Send direction.
    pub upload: u64,
}

/// Packet loss percentages, per direction and overall.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PacketLoss {
    /// Receive-side loss, percent.
    pub download: u8,

    /// Send-side loss, percent.
    pub upload: u8,

    /// Overall loss, percent.
    pub total: u8,
}

/// Active transport candidate pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportPair {
    /// `ip:port` of the local candidate.
    pub local: String,

    /// `ip:port` of the remote candidate.
    pub remote: String,

    /// Transport protocol of the pair.
    pub protocol: String,

    /// Type of the local candidate (`host`, `relay`, ...).
    pub candidate_type: String,
}

/// Normalized view over one stats poll.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Time of the poll, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,

    /// Available bandwidth estimates, when the stack reports them.
    pub bandwidth: Kbps,

    /// Actual bitrates summed over all RTP streams.
    pub bitrate: Kbps,

    /// Packet loss derived from counter diffs.
    pub packet_loss: PacketLoss,

    /// Frame dimensions per SSRC, first reported value wins.
    pub resolutions: HashMap<u32, (u32, u32)>,

    /// Deduplicated nominated transport pairs.
    pub transport: Vec<TransportPair>,
}

/// Audio level of one RTP stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioLevel {
    /// SSRC the level belongs to.
    pub ssrc: u32,

    /// Level normalized to `[0; 1]`.
    pub level: f64,

    /// Whether the stream is locally originated.
    pub is_local: bool,
}

/// Events surfaced by a [`StatsCollector`].
#[derive(Clone, Debug, PartialEq)]
pub enum StatsEvent {
    /// Fresh per-SSRC audio level.
    AudioLevel(AudioLevel),

    /// Fresh connection stats snapshot.
    Snapshot(StatsSnapshot),
}

/// Raw counter sums a diff is computed against.
#[derive(Clone, Copy, Debug, Default)]
pub struct Baseline {
    /// Time of the poll the sums were taken at.
    pub timestamp_ms: u64,

    /// Total bytes received over all inbound streams.
    pub bytes_received: u64,

    /// Total bytes sent over all outbound streams.
    pub bytes_sent: u64,

    /// Total packets received.
    pub packets_received: u64,

    /// Total packets lost, receive side.
    pub packets_lost_recv: i64,

    /// Total packets sent.
    pub packets_sent: u64,

    /// Total packets lost, send side (as reported by the remote end).
    pub packets_lost_sent: i64,
}

/// Normalizes a native report into a [`StatsSnapshot`], diffing counters
/// against the previous poll's [`Baseline`].
///
/// Counter regressions (a stack reporting a smaller total than before)
/// clamp to zero instead of going negative.
#[must_use]
pub fn normalize(
    report: &[RtcStat],
    previous: Option<&Baseline>,
    timestamp_ms: u64,
) -> (StatsSnapshot, Baseline) {
    let mut baseline = Baseline {
        timestamp_ms,
        ..Baseline::default()
    };
    let mut snapshot = StatsSnapshot {
        timestamp_ms,
        ..StatsSnapshot::default()
    };

    let mut candidates: HashMap<&str, &platform::IceCandidateStats> =
        HashMap::new();
    for stat in report {
        match stat {
            RtcStat::LocalCandidate(c) | RtcStat::RemoteCandidate(c) => {
                candidates.insert(&c.id, c);
            }
            _ => (),
        }
    }

    for stat in report {
        match stat {
            RtcStat::InboundRtp(rtp) => {
                baseline.bytes_received += rtp.bytes_received;
                baseline.packets_received += rtp.packets_received;
                baseline.packets_lost_recv += rtp.packets_lost;
                if let (Some(width), Some(height)) =
                    (rtp.frame_width, rtp.frame_height)
                {
                    snapshot
                        .resolutions
                        .entry(rtp.ssrc)
                        .or_insert((width, height));
                }
            }
            RtcStat::OutboundRtp(rtp) => {
                baseline.bytes_sent += rtp.bytes_sent;
                baseline.packets_sent += rtp.packets_sent;
                baseline.packets_lost_sent += rtp.packets_lost;
                if let (Some(width), Some(height)) =
                    (rtp.frame_width, rtp.frame_height)
                {
                    snapshot
                        .resolutions
                        .entry(rtp.ssrc)
                        .or_insert((width, height));
                }
            }
            RtcStat::CandidatePair(pair) if pair.nominated => {
                if let Some(kbps) = pair.available_incoming_bitrate {
                    snapshot.bandwidth.download = kbps / 1000;
                }
                if let Some(kbps) = pair.available_outgoing_bitrate {
                    snapshot.bandwidth.upload = kbps / 1000;
                }
                let local = candidates.get(pair.local_candidate_id.as_str());
                let remote =
                    candidates.get(pair.remote_candidate_id.as_str());
                if let (Some(local), Some(remote)) = (local, remote) {
                    let entry = TransportPair {
                        local: endpoint_of(local),
                        remote: endpoint_of(remote),
                        protocol: local
                            .protocol
                            .clone()
                            .unwrap_or_default(),
                        candidate_type: local.candidate_type.clone(),
                    };
                    if !snapshot.transport.contains(&entry) {
                        snapshot.transport.push(entry);
                    }
                }
            }
            _ => (),
        }
    }

    if let Some(prev) = previous {
        let dt_ms = timestamp_ms.saturating_sub(prev.timestamp_ms);
        if dt_ms > 0 {
            snapshot.bitrate.download = rate_kbps(
                baseline.bytes_received.saturating_sub(prev.bytes_received),
                dt_ms,
            );
            snapshot.bitrate.upload = rate_kbps(
                baseline.bytes_sent.saturating_sub(prev.bytes_sent),
                dt_ms,
            );
        }

        let recv_lost = clamp(
            baseline.packets_lost_recv - prev.packets_lost_recv,
        );
        let recv_total = baseline
            .packets_received
            .saturating_sub(prev.packets_received)
            + recv_lost;
        let sent_lost = clamp(
            baseline.packets_lost_sent - prev.packets_lost_sent,
        );
        let sent_total =
            baseline.packets_sent.saturating_sub(prev.packets_sent)
                + sent_lost;

        snapshot.packet_loss.download = percent(recv_lost, recv_total);
        snapshot.packet_loss.upload = percent(sent_lost, sent_total);
        snapshot.packet_loss.total = percent(
            recv_lost + sent_lost,
            recv_total + sent_total,
        );
    }

    (snapshot, baseline)
}

/// Extracts per-SSRC audio levels out of a native report.
///
/// Levels above `1.0` come from stacks reporting the raw 15-bit sample
/// value and are scaled down by `32767`.
#[must_use]
pub fn audio_levels(report: &[RtcStat]) -> Vec<AudioLevel> {
    let mut out = Vec::new();
    for stat in report {
        let (ssrc, kind, level, is_local) = match stat {
            RtcStat::InboundRtp(rtp) => {
                (rtp.ssrc, &rtp.kind, rtp.audio_level, false)
            }
            RtcStat::OutboundRtp(rtp) => {
                (rtp.ssrc, &rtp.kind, rtp.audio_level, true)
            }
            _ => continue,
        };
        if kind != "audio" {
            continue;
        }
        if let Some(raw) = level {
            let level = if raw > 1.0 { raw / 32767.0 } else { raw };
            out.push(AudioLevel {
                ssrc,
                level,
                is_local,
            });
        }
    }
    out
}

/// Periodic poller of one peer connection's statistics.
///
/// Holds a bounded ring of the latest [`StatsSnapshot`]s and fans
/// [`StatsEvent`]s out to subscribers. Dropped (or stopped) collectors
/// stop their loops on the next tick.
pub struct StatsCollector {
    /// Connection being polled.
    peer: Rc<dyn platform::RtcPeerConnection>,

    /// Latest snapshots, newest last.
    ring: RefCell<VecDeque<StatsSnapshot>>,

    /// Bound of the ring buffer.
    max_stats: usize,

    /// Counter sums of the previous connection-stats poll.
    baseline: RefCell<Option<Baseline>>,

    /// Event subscribers.
    subs: RefCell<Vec<mpsc::UnboundedSender<StatsEvent>>>,

    /// Set once the collector is stopped.
    stopped: Cell<bool>,
}

impl StatsCollector {
    /// Creates a [`StatsCollector`] over the provided connection and
    /// starts its polling loops.
    ///
    /// A `max_stats` of `0` disables collection entirely: no loops are
    /// spawned and no snapshots are kept.
    #[must_use]
    pub fn spawn(
        peer: Rc<dyn platform::RtcPeerConnection>,
        max_stats: usize,
    ) -> Rc<Self> {
        let this = Rc::new(Self {
            peer,
            ring: RefCell::new(VecDeque::new()),
            max_stats,
            baseline: RefCell::new(None),
            subs: RefCell::new(Vec::new()),
            stopped: Cell::new(false),
        });
        if max_stats > 0 {
            Self::spawn_audio_level_loop(Rc::downgrade(&this));
            Self::spawn_connection_stats_loop(Rc::downgrade(&this));
        }
        this
    }

    /// Subscribes to this collector's [`StatsEvent`]s.
    pub fn subscribe(&self) -> LocalBoxStream<'static, StatsEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    /// Returns the collected snapshots, oldest first.
    #[must_use]
    pub fn snapshots(&self) -> Vec<StatsSnapshot> {
        self.ring.borrow().iter().cloned().collect()
    }

    /// Stops the polling loops.
    #[inline]
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    fn emit(&self, event: StatsEvent) {
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }

    fn spawn_audio_level_loop(weak: Weak<Self>) {
        platform::spawn(async move {
            loop {
                platform::delay_for(AUDIO_LEVEL_INTERVAL).await;
                let this = match weak.upgrade() {
                    Some(this) if !this.stopped.get() => this,
                    _ => break,
                };
                match this.peer.get_stats().await {
                    Ok(report) => {
                        for level in audio_levels(&report) {
                            this.emit(StatsEvent::AudioLevel(level));
                        }
                    }
                    Err(e) => log::debug!("Audio level poll failed: {}", e),
                }
            }
        });
    }

    fn spawn_connection_stats_loop(weak: Weak<Self>) {
        platform::spawn(async move {
            loop {
                platform::delay_for(CONNECTION_STATS_INTERVAL).await;
                let this = match weak.upgrade() {
                    Some(this) if !this.stopped.get() => this,
                    _ => break,
                };
                match this.peer.get_stats().await {
                    Ok(report) => {
                        let (snapshot, baseline) = normalize(
                            &report,
                            this.baseline.borrow().as_ref(),
                            now_ms(),
                        );
                        *this.baseline.borrow_mut() = Some(baseline);
                        {
                            let mut ring = this.ring.borrow_mut();
                            if ring.len() == this.max_stats {
                                ring.pop_front();
                            }
                            ring.push_back(snapshot.clone());
                        }
                        this.emit(StatsEvent::Snapshot(snapshot));
                    }
                    Err(e) => {
                        log::debug!("Connection stats poll failed: {}", e);
                    }
                }
            }
        });
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn endpoint_of(candidate: &platform::IceCandidateStats) -> String {
    format!(
        "{}:{}",
        candidate.address.as_deref().unwrap_or("?"),
        candidate.port.unwrap_or_default(),
    )
}

fn rate_kbps(bytes: u64, dt_ms: u64) -> u64 {
    bytes * 8 / dt_ms
}

fn clamp(diff: i64) -> u64 {
    if diff < 0 {
        0
    } else {
        diff as u64
    }
}

fn percent(lost: u64, total: u64) -> u8 {
    if total == 0 {
        0
    } else {
        ((lost as f64 / total as f64) * 100.0).round() as u8
    }
}
