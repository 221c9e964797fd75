use std::collections::BTreeSet;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Verdict for a single packet against its channel's sequencing state. The
///  discriminants are the values stored in journal records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OrderStatus {
    Unsequenced = 0,
    First = 1,
    InOrder = 2,
    /// Arrived after we expected it: the sequence is at or below the
    ///  channel's highest seen sequence but above the confirmation watermark.
    OutOfOrderLate = 3,
    /// Arrived before we expected it: the sequence jumps past the
    ///  confirmation watermark, opening (or widening) a gap.
    OutOfOrderEarly = 4,
    Duplicate = 5,
}

impl OrderStatus {
    pub fn is_out_of_order(&self) -> bool {
        matches!(self, OrderStatus::OutOfOrderLate | OrderStatus::OutOfOrderEarly)
    }
}

/// Sequencing state of one `(port, unit)` channel.
#[derive(Debug, Default)]
pub struct ChannelState {
    /// Highest sequence for which this and every prior sequence has been
    ///  received. 0 until the first sequenced packet arrives.
    pub last_confirmed_seq: u32,

    /// Highest sequence ever observed on the channel; exceeds
    ///  `last_confirmed_seq` exactly when gaps exist.
    pub highest_seen_seq: u32,

    /// Sequences received out of order, waiting for the gap below them to
    ///  fill. Grows without bound under prolonged loss - there is no cap, a
    ///  channel that never recovers keeps its pending set until `clear`.
    pub pending: BTreeSet<u32>,
}

impl ChannelState {
    /// True while gaps exist below the highest seen sequence.
    pub fn has_gap(&self) -> bool {
        self.last_confirmed_seq < self.highest_seen_seq
    }
}

/// Tracks packet ordering independently per `(port, unit)` channel. Invoked
///  only from the receive loop; not thread-safe by design.
#[derive(Default)]
pub struct SequenceTracker {
    channels: FxHashMap<(u16, u8), ChannelState>,
}

impl SequenceTracker {
    pub fn new() -> SequenceTracker {
        SequenceTracker {
            channels: Default::default(),
        }
    }

    /// Classifies a packet covering `sequence ..= sequence+count-1` on the
    ///  given channel and updates the channel state.
    pub fn track(&mut self, sequence: u32, count: u8, port: u16, unit: u8) -> OrderStatus {
        if sequence == 0 {
            return OrderStatus::Unsequenced;
        }

        let channel = self.channels.entry((port, unit)).or_default();

        let mut message_count = u32::from(count).max(1);

        // A sequence this close to the 32-bit wrap means the sender is about
        //  to reset; treat the packet as covering a single sequence so the
        //  span arithmetic below cannot overflow.
        if sequence > u32::MAX - message_count + 1 {
            message_count = 1;
        }
        let covered_end = sequence + (message_count - 1);

        if channel.last_confirmed_seq == 0 && channel.highest_seen_seq == 0 {
            channel.last_confirmed_seq = covered_end;
            channel.highest_seen_seq = covered_end;
            return OrderStatus::First;
        }

        if sequence <= channel.last_confirmed_seq {
            OrderStatus::Duplicate
        }
        // no overflow: sequence > last_confirmed_seq here
        else if sequence == channel.last_confirmed_seq + 1 {
            channel.last_confirmed_seq = covered_end;
            channel.highest_seen_seq = channel.highest_seen_seq.max(covered_end);
            Self::absorb_pending(channel);
            OrderStatus::InOrder
        }
        else if sequence <= channel.highest_seen_seq {
            // Late arrival into a known gap (or a repeat of a pending
            //  packet). The covered range is remembered so a later in-order
            //  advance can absorb it; confirmation only ever moves through
            //  the in-order path.
            channel.pending.extend(sequence..=covered_end);
            channel.highest_seen_seq = channel.highest_seen_seq.max(covered_end);
            OrderStatus::OutOfOrderLate
        }
        else {
            debug!(
                "gap on ({}, {}): expected {}, got {} covering through {}",
                port,
                unit,
                channel.last_confirmed_seq + 1,
                sequence,
                covered_end
            );
            channel.pending.extend(sequence..=covered_end);
            channel.highest_seen_seq = covered_end;
            OrderStatus::OutOfOrderEarly
        }
    }

    /// After an in-order advance: drop pending sequences the advance has
    ///  overtaken, then move `last_confirmed_seq` over the longest contiguous
    ///  run of pending sequences starting right above it, removing the run
    ///  from the pending set.
    fn absorb_pending(channel: &mut ChannelState) {
        // a multi-message packet may confirm sequences that arrived early
        match channel.last_confirmed_seq.checked_add(1) {
            Some(above) => channel.pending = channel.pending.split_off(&above),
            None => channel.pending.clear(),
        }

        loop {
            let next = channel.last_confirmed_seq.saturating_add(1);
            if !channel.pending.remove(&next) {
                return;
            }
            let mut run_end = next;
            while run_end < u32::MAX && channel.pending.remove(&(run_end + 1)) {
                run_end += 1;
            }
            channel.last_confirmed_seq = run_end;
        }
    }

    /// State of one channel, if it has seen any sequenced packet.
    pub fn channel(&self, port: u16, unit: u8) -> Option<&ChannelState> {
        self.channels.get(&(port, unit))
    }

    pub fn channel_states(&self) -> impl Iterator<Item = &ChannelState> {
        self.channels.values()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Drops all per-channel state; the next sequenced packet on any channel
    ///  is classified as first again.
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
