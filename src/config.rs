use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::bail;

/// Everything the capture pipeline can be tuned with. The defaults are sized
///  for a full trading session on a production PITCH feed (10M+ packets).
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// The IPv4 multicast group both sockets join, on the any-address
    ///  interface.
    pub multicast_group: Ipv4Addr,

    /// The two UDP ports the feed is received on. Real-time and retransmitted
    ///  traffic arrive on separate ports; sequencing is tracked per
    ///  `(port, unit)` so the two never interfere.
    pub port1: u16,
    pub port2: u16,

    /// When set, heartbeat packets are counted and then discarded before
    ///  sequence tracking and journaling. Heartbeats carry no market data and
    ///  at one per unit per second they are pure noise in the journal.
    pub skip_heartbeats: bool,

    /// Requested SO_RCVBUF per socket. The feed bursts hard at the open; an
    ///  undersized kernel buffer shows up as silent drops, not errors. If the
    ///  kernel grants less than requested a warning is logged.
    pub recv_buffer_size: usize,

    /// Upper bound for a single datagram, and the upper bound accepted for a
    ///  header's declared length during validation.
    pub max_buf: usize,

    /// Path of the active journal file. Rotated files get a numeric suffix
    ///  (`<log_file>.1` is the most recently rotated).
    pub log_file: PathBuf,

    /// Rotation threshold in bytes for the active journal file.
    pub log_file_size: u64,

    /// Number of rotated files kept; the slot beyond this count is unlinked
    ///  at rotation time.
    pub log_file_count: usize,

    /// Capacity of the journal queue in entries. When the queue is full,
    ///  submission blocks - the journal never drops a packet.
    pub async_queue_size: usize,

    /// Number of journal writer threads draining the queue.
    pub async_threads: usize,

    /// Emit a performance report every this many packets.
    pub stats_interval: u64,

    /// Request a journal drain every this many packets.
    pub flush_interval: u64,
}

impl CaptureConfig {
    /// Defaults matching the production feed deployment: ports 30501/30502 on
    ///  233.218.133.80, 500 MiB x 50 rotated files, 1M-entry queue, four
    ///  writer threads.
    pub fn default_feed() -> CaptureConfig {
        CaptureConfig {
            multicast_group: Ipv4Addr::new(233, 218, 133, 80),
            port1: 30501,
            port2: 30502,
            skip_heartbeats: true,
            recv_buffer_size: 64 * 1024 * 1024,
            max_buf: 2048,
            log_file: PathBuf::from("packets_binary.log"),
            log_file_size: 500 * 1024 * 1024,
            log_file_count: 50,
            async_queue_size: 1024 * 1024,
            async_threads: 4,
            stats_interval: 100_000,
            flush_interval: 1_000_000,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.multicast_group.is_multicast() {
            bail!("{} is not a multicast address", self.multicast_group);
        }
        if self.port1 == self.port2 {
            bail!("the two receive ports must differ");
        }
        if self.max_buf < crate::packet_header::SequencedUnitHeader::SERIALIZED_LEN {
            bail!("max_buf is smaller than the sequenced-unit header");
        }
        if self.log_file_size == 0 {
            bail!("log file size must be positive");
        }
        if self.log_file_count == 0 {
            bail!("at least one rotated journal file must be kept");
        }
        if self.async_queue_size == 0 {
            bail!("journal queue capacity must be positive");
        }
        if self.async_threads == 0 {
            bail!("at least one journal writer thread is required");
        }
        if self.stats_interval == 0 || self.flush_interval == 0 {
            bail!("stats and flush intervals must be positive");
        }
        Ok(())
    }
}
