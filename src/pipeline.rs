use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::CaptureConfig;
use crate::ingress::PacketSink;
use crate::journal::Journal;
use crate::packet_header::{PacketType, SequencedUnitHeader};
use crate::record::PacketRecord;
use crate::sequence_tracker::{OrderStatus, SequenceTracker};
use crate::stats::SessionStats;

/// Glues the stages together: every packet from ingress is validated,
///  classified, sequence-checked and journaled, all synchronously on the
///  receive path. Only the journal queue separates this from disk latency.
pub struct CapturePipeline {
    config: CaptureConfig,
    journal: Journal,
    state: Mutex<PipelineState>,
}

struct PipelineState {
    tracker: SequenceTracker,
    stats: SessionStats,
}

impl CapturePipeline {
    pub fn new(config: CaptureConfig, journal: Journal) -> CapturePipeline {
        CapturePipeline {
            config,
            journal,
            state: Mutex::new(PipelineState {
                tracker: SequenceTracker::new(),
                stats: SessionStats::new(),
            }),
        }
    }

    fn process(&self, packet_id: u32, port: u16, data: &[u8], src: Ipv4Addr) {
        let mut state = self.state.lock().unwrap();
        state.stats.total += 1;

        let header = match SequencedUnitHeader::deser(&mut &data[..]) {
            Ok(header) => header,
            Err(_) => {
                state.stats.invalid += 1;
                warn!("packet #{}: truncated header ({} bytes), dropping", packet_id, data.len());
                return;
            }
        };
        if !header.validate(data.len(), self.config.max_buf) {
            state.stats.invalid += 1;
            warn!(
                "packet #{}: implausible declared length {} for {} received bytes, dropping",
                packet_id,
                header.length,
                data.len()
            );
            return;
        }

        let packet_type = PacketType::classify(header.sequence, header.count, data.len());
        match packet_type {
            PacketType::Heartbeat => {
                if self.config.skip_heartbeats {
                    state.stats.heartbeats_skipped += 1;
                    return;
                }
            }
            PacketType::Data => state.stats.data += 1,
            PacketType::Admin => state.stats.admin += 1,
            PacketType::Unsequenced => state.stats.unsequenced += 1,
        }

        let order_status = state.tracker.track(header.sequence, header.count, port, header.unit);
        if order_status.is_out_of_order() {
            state.stats.out_of_order += 1;
        }
        else if order_status == OrderStatus::Duplicate {
            state.stats.duplicates += 1;
        }

        let record = PacketRecord::capture(
            packet_id,
            port,
            data,
            &header,
            packet_type,
            order_status,
            src,
            wall_clock_nanos(),
        );
        self.journal.submit(&record, data);

        if state.stats.total % self.config.stats_interval == 0 {
            info!("{}", state.stats.report());
        }
        if state.stats.total % self.config.flush_interval == 0 {
            if let Err(e) = self.journal.drain() {
                warn!("periodic journal drain failed: {:#}", e);
            }
        }
    }

    /// Runs a statistics snapshot through the given closure. The reporter and
    ///  the receive path share one lock; contention is nil because both run
    ///  on the capture side.
    pub fn with_stats<R>(&self, f: impl FnOnce(&SessionStats) -> R) -> R {
        f(&self.state.lock().unwrap().stats)
    }

    /// Drains the journal, stops its writers and logs the final summary.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        info!("flushing remaining journal data");
        let result = self.journal.shutdown();

        // the writer pool's root cause, separate from the drain result the
        //  caller gets back
        if let Some(failure) = self.journal.take_failure() {
            error!("journal writer pool failed during the session: {:#}", failure);
        }

        let state = self.state.lock().unwrap();
        info!("final: {}", state.stats.report());
        let open_gaps = state.tracker.channel_states().filter(|c| c.has_gap()).count();
        info!(
            "{} channels tracked ({} with open gaps), {} data / {} admin / {} unsequenced packets",
            state.tracker.channel_count(),
            open_gaps,
            state.stats.data,
            state.stats.admin,
            state.stats.unsequenced
        );

        result
    }
}

#[async_trait]
impl PacketSink for CapturePipeline {
    async fn on_packet(&self, packet_id: u32, port: u16, data: &[u8], src: Ipv4Addr) {
        self.process(packet_id, port, data, src);
    }
}

fn wall_clock_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
