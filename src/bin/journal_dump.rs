//! Offline reader for capture journal files: walks the concatenated records
//! of one file, prints them and summarizes what the session saw. The stored
//! payload prefix is enough to label the first message of each packet via
//! the PITCH framing header; message bodies are left opaque.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use rustc_hash::FxHashMap;

use pitch_capture::packet_header::{lookup_message_type, MessageHeader, PacketType};
use pitch_capture::record::PacketRecord;
use pitch_capture::sequence_tracker::OrderStatus;

#[derive(Parser)]
struct Args {
    /// Journal file to read (an active or rotated capture file)
    file: PathBuf,

    /// Print at most this many records (0 = summary only)
    #[clap(short = 'n', long, default_value_t = 20)]
    limit: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let file = File::open(&args.file)
        .with_context(|| format!("opening {}", args.file.display()))?;
    let mut reader = BufReader::new(file);

    let mut total = 0u64;
    let mut by_type: FxHashMap<PacketType, u64> = FxHashMap::default();
    let mut by_status: FxHashMap<OrderStatus, u64> = FxHashMap::default();
    let mut first_timestamp = None;
    let mut last_timestamp = 0u64;

    loop {
        let mut header_buf = [0u8; PacketRecord::HEADER_LEN];
        match reader.read_exact(&mut header_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("reading record header"),
        }
        let record = PacketRecord::deser(&mut &header_buf[..])
            .with_context(|| format!("record {} is corrupt", total + 1))?;

        let mut payload = vec![0u8; record.payload_length as usize];
        if let Err(e) = reader.read_exact(&mut payload) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                bail!("file ends inside the payload of record {}", total + 1);
            }
            return Err(e).context("reading record payload");
        }

        total += 1;
        *by_type.entry(record.packet_type).or_default() += 1;
        *by_status.entry(record.order_status).or_default() += 1;
        first_timestamp.get_or_insert(record.timestamp_ns);
        last_timestamp = record.timestamp_ns;

        if total <= args.limit {
            print_record(&record, &payload);
        }
    }

    if total > args.limit && args.limit > 0 {
        println!("... {} more records", total - args.limit);
    }

    println!();
    println!("records={}", total);
    for (packet_type, count) in sorted(&by_type) {
        println!("type_{:?}={}", packet_type, count);
    }
    for (status, count) in sorted(&by_status) {
        println!("status_{:?}={}", status, count);
    }
    if let Some(first) = first_timestamp {
        let span_ms = last_timestamp.saturating_sub(first) / 1_000_000;
        println!("span_ms={}", span_ms);
    }

    Ok(())
}

fn print_record(record: &PacketRecord, payload: &[u8]) {
    let first_message = first_message_label(record, payload);
    println!(
        "#{:<9} {} port={} unit={} seq={:<10} len={} {:?}/{:?}{}",
        record.packet_id,
        record.src_addr(),
        record.port,
        record.unit,
        record.sequence,
        record.length,
        record.packet_type,
        record.order_status,
        first_message
            .map(|name| format!(" first_msg={}", name))
            .unwrap_or_default(),
    );
}

/// Name of the first message in the stored payload, read from the framing
///  header behind the 8-byte packet header.
fn first_message_label(record: &PacketRecord, payload: &[u8]) -> Option<&'static str> {
    if record.count == 0 || payload.len() < 10 {
        return None;
    }
    let message = MessageHeader::deser(&mut &payload[8..]).ok()?;
    lookup_message_type(message.message_type).map(|info| info.name)
}

fn sorted<K: Copy + Into<u8>, V: Copy>(map: &FxHashMap<K, V>) -> Vec<(K, V)> {
    let mut entries: Vec<(K, V)> = map.iter().map(|(&k, &v)| (k, v)).collect();
    entries.sort_by_key(|(k, _)| (*k).into());
    entries
}
