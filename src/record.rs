use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};

use crate::packet_header::{PacketType, SequencedUnitHeader};
use crate::sequence_tracker::OrderStatus;

/// The fixed header of one journal record. On disk it is followed by
///  `payload_length` bytes of the original packet; records are concatenated
///  with no separator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketRecord {
    /// Wall clock at capture time, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
    /// Monotonic counter assigned by ingress, from 1, across both ports.
    pub packet_id: u32,
    /// Sequence copied from the packet's sequenced-unit header.
    pub sequence: u32,
    /// Source IPv4 address in network byte order.
    pub src_ip: u32,
    /// Receiving UDP port.
    pub port: u16,
    /// Original datagram length; may exceed `payload_length`.
    pub length: u16,
    pub count: u8,
    pub unit: u8,
    pub packet_type: PacketType,
    pub order_status: OrderStatus,
    /// Number of payload bytes stored with the record.
    pub payload_length: u16,
}

impl PacketRecord {
    pub const HEADER_LEN: usize = 30;

    /// At most this many payload bytes are stored per record; enough for the
    ///  sequenced-unit header and the leading messages of any packet.
    pub const MAX_STORED_PAYLOAD: usize = 256;

    /// Builds the record for a captured packet, truncating the stored payload
    ///  and capturing the timestamp now.
    pub fn capture(
        packet_id: u32,
        port: u16,
        data: &[u8],
        header: &SequencedUnitHeader,
        packet_type: PacketType,
        order_status: OrderStatus,
        src: Ipv4Addr,
        timestamp_ns: u64,
    ) -> PacketRecord {
        PacketRecord {
            timestamp_ns,
            packet_id,
            sequence: header.sequence,
            src_ip: u32::from_le_bytes(src.octets()),
            port,
            length: data.len() as u16,
            count: header.count,
            unit: header.unit,
            packet_type,
            order_status,
            payload_length: data.len().min(Self::MAX_STORED_PAYLOAD) as u16,
        }
    }

    /// The source address, undoing the network-byte-order storage.
    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_ip.to_le_bytes())
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.timestamp_ns);
        buf.put_u32_le(self.packet_id);
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(self.src_ip);
        buf.put_u16_le(self.port);
        buf.put_u16_le(self.length);
        buf.put_u8(self.count);
        buf.put_u8(self.unit);
        buf.put_u8(self.packet_type.into());
        buf.put_u8(self.order_status.into());
        buf.put_u16_le(self.payload_length);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketRecord> {
        Ok(PacketRecord {
            timestamp_ns: buf.try_get_u64_le()?,
            packet_id: buf.try_get_u32_le()?,
            sequence: buf.try_get_u32_le()?,
            src_ip: buf.try_get_u32_le()?,
            port: buf.try_get_u16_le()?,
            length: buf.try_get_u16_le()?,
            count: buf.try_get_u8()?,
            unit: buf.try_get_u8()?,
            packet_type: PacketType::try_from(buf.try_get_u8()?)?,
            order_status: OrderStatus::try_from(buf.try_get_u8()?)?,
            payload_length: buf.try_get_u16_le()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample_record() -> PacketRecord {
        PacketRecord {
            timestamp_ns: 1_700_000_000_123_456_789,
            packet_id: 42,
            sequence: 1337,
            src_ip: u32::from_le_bytes([10, 1, 2, 3]),
            port: 30501,
            length: 72,
            count: 3,
            unit: 7,
            packet_type: PacketType::Data,
            order_status: OrderStatus::InOrder,
            payload_length: 72,
        }
    }

    #[rstest]
    #[case::data(sample_record())]
    #[case::heartbeat(PacketRecord {
        timestamp_ns: 1,
        packet_id: 1,
        sequence: 0,
        src_ip: 0,
        port: 30502,
        length: 8,
        count: 0,
        unit: 0,
        packet_type: PacketType::Heartbeat,
        order_status: OrderStatus::Unsequenced,
        payload_length: 8,
    })]
    #[case::max_values(PacketRecord {
        timestamp_ns: u64::MAX,
        packet_id: u32::MAX,
        sequence: u32::MAX,
        src_ip: u32::MAX,
        port: u16::MAX,
        length: u16::MAX,
        count: u8::MAX,
        unit: u8::MAX,
        packet_type: PacketType::Admin,
        order_status: OrderStatus::Duplicate,
        payload_length: PacketRecord::MAX_STORED_PAYLOAD as u16,
    })]
    fn test_ser_deser(#[case] original: PacketRecord) {
        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        assert_eq!(buf.len(), PacketRecord::HEADER_LEN);

        let mut b: &[u8] = &buf;
        let deser = PacketRecord::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[test]
    fn test_field_offsets_match_the_on_disk_layout() {
        let record = sample_record();
        let mut buf = BytesMut::new();
        record.ser(&mut buf);

        assert_eq!(&buf[0..8], &record.timestamp_ns.to_le_bytes());
        assert_eq!(&buf[8..12], &record.packet_id.to_le_bytes());
        assert_eq!(&buf[12..16], &record.sequence.to_le_bytes());
        assert_eq!(&buf[16..20], &[10, 1, 2, 3]);
        assert_eq!(&buf[20..22], &record.port.to_le_bytes());
        assert_eq!(&buf[22..24], &record.length.to_le_bytes());
        assert_eq!(buf[24], record.count);
        assert_eq!(buf[25], record.unit);
        assert_eq!(buf[26], 3); // data
        assert_eq!(buf[27], 2); // in order
        assert_eq!(&buf[28..30], &record.payload_length.to_le_bytes());
    }

    #[test]
    fn test_deser_rejects_unknown_enum_values() {
        let mut buf = BytesMut::new();
        sample_record().ser(&mut buf);
        buf[26] = 17;
        assert!(PacketRecord::deser(&mut buf.as_ref()).is_err());
    }

    #[test]
    fn test_capture_truncates_stored_payload() {
        let header = SequencedUnitHeader { length: 1200, count: 5, unit: 2, sequence: 99 };
        let data = vec![0u8; 1200];
        let record = PacketRecord::capture(
            7,
            30501,
            &data,
            &header,
            PacketType::Data,
            OrderStatus::First,
            Ipv4Addr::new(192, 168, 1, 10),
            123,
        );

        assert_eq!(record.length, 1200);
        assert_eq!(record.payload_length, PacketRecord::MAX_STORED_PAYLOAD as u16);
        assert_eq!(record.src_addr(), Ipv4Addr::new(192, 168, 1, 10));
    }
}
