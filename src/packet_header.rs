use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Heartbeats are identified by length: a sequence-0, count-0 packet of at
///  most this many bytes. This threshold is a feed convention, not a protocol
///  constant.
pub const HEARTBEAT_MAX_LEN: usize = 20;

/// Senders occasionally declare a couple more bytes than actually arrive
///  (transport-layer padding anomalies). The slack is kept as-is so replays
///  of old captures classify identically.
const DECLARED_LENGTH_SLACK: usize = 100;

/// The 8-byte header at the start of every PITCH packet, little-endian on
///  the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequencedUnitHeader {
    /// Total packet length as declared by the sender.
    pub length: u16,
    /// Number of messages in the packet; 0 for heartbeat / admin traffic.
    pub count: u8,
    /// Channel id within the port. Sequences are independent per unit.
    pub unit: u8,
    /// 1-based sequence of the first message in the packet; 0 means
    ///  unsequenced.
    pub sequence: u32,
}

impl SequencedUnitHeader {
    pub const SERIALIZED_LEN: usize = 8;

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.length);
        buf.put_u8(self.count);
        buf.put_u8(self.unit);
        buf.put_u32_le(self.sequence);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<SequencedUnitHeader> {
        Ok(SequencedUnitHeader {
            length: buf.try_get_u16_le()?,
            count: buf.try_get_u8()?,
            unit: buf.try_get_u8()?,
            sequence: buf.try_get_u32_le()?,
        })
    }

    /// Sanity checks against the actually received datagram. Packets failing
    ///  these are dropped before tracking and journaling.
    pub fn validate(&self, received_len: usize, max_buf: usize) -> bool {
        if self.length == 0 || self.length as usize > max_buf {
            return false;
        }
        self.length as usize <= received_len + DECLARED_LENGTH_SLACK
    }
}

/// Coarse packet classification derived purely from the header and the
///  datagram length. The discriminants are the values stored in journal
///  records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PacketType {
    Heartbeat = 0,
    Admin = 1,
    Unsequenced = 2,
    Data = 3,
}

impl PacketType {
    pub fn classify(sequence: u32, count: u8, len: usize) -> PacketType {
        if sequence == 0 {
            if count == 0 && len <= HEARTBEAT_MAX_LEN {
                PacketType::Heartbeat
            }
            else if count == 0 {
                PacketType::Admin
            }
            else {
                PacketType::Unsequenced
            }
        }
        else {
            PacketType::Data
        }
    }
}

/// The 2-byte framing header in front of each message inside a packet. Only
///  the framing is interpreted, message bodies are opaque.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    /// Length of the message including this header.
    pub length: u8,
    pub message_type: u8,
}

impl MessageHeader {
    pub const SERIALIZED_LEN: usize = 2;

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<MessageHeader> {
        Ok(MessageHeader {
            length: buf.try_get_u8()?,
            message_type: buf.try_get_u8()?,
        })
    }
}

/// Static information about a PITCH message type, keyed by the type id in
///  the message framing header.
pub struct MessageTypeInfo {
    pub type_id: u8,
    pub name: &'static str,
    pub description: &'static str,
    pub min_length: u8,
}

pub fn lookup_message_type(type_id: u8) -> Option<&'static MessageTypeInfo> {
    MESSAGE_TYPES.iter().find(|info| info.type_id == type_id)
}

static MESSAGE_TYPES: &[MessageTypeInfo] = &[
    MessageTypeInfo { type_id: 0x97, name: "UNIT_CLEAR", description: "Unit Clear", min_length: 2 },
    MessageTypeInfo { type_id: 0x3B, name: "TRADING_STATUS", description: "Trading Status", min_length: 8 },
    MessageTypeInfo { type_id: 0x37, name: "ADD_ORDER", description: "Add Order", min_length: 34 },
    MessageTypeInfo { type_id: 0x38, name: "ORDER_EXECUTED", description: "Order Executed", min_length: 30 },
    MessageTypeInfo { type_id: 0x58, name: "ORDER_EXECUTED_AT_PRICE", description: "Order Executed at Price", min_length: 38 },
    MessageTypeInfo { type_id: 0x39, name: "REDUCE_SIZE", description: "Reduce Size", min_length: 18 },
    MessageTypeInfo { type_id: 0x3A, name: "MODIFY_ORDER", description: "Modify Order", min_length: 34 },
    MessageTypeInfo { type_id: 0x3C, name: "DELETE_ORDER", description: "Delete Order", min_length: 18 },
    MessageTypeInfo { type_id: 0x3D, name: "TRADE", description: "Trade", min_length: 42 },
    MessageTypeInfo { type_id: 0x3E, name: "TRADE_BREAK", description: "Trade Break", min_length: 18 },
    MessageTypeInfo { type_id: 0xE3, name: "CALCULATED_VALUE", description: "Calculated Value", min_length: 26 },
    MessageTypeInfo { type_id: 0x2D, name: "END_OF_SESSION", description: "End of Session", min_length: 2 },
    MessageTypeInfo { type_id: 0x59, name: "AUCTION_UPDATE", description: "Auction Update", min_length: 30 },
    MessageTypeInfo { type_id: 0x5A, name: "AUCTION_SUMMARY", description: "Auction Summary", min_length: 30 },
    MessageTypeInfo { type_id: 0x01, name: "LOGIN", description: "Login", min_length: 44 },
    MessageTypeInfo { type_id: 0x02, name: "LOGIN_RESPONSE", description: "Login Response", min_length: 3 },
    MessageTypeInfo { type_id: 0x03, name: "GAP_REQUEST", description: "Gap Request", min_length: 20 },
    MessageTypeInfo { type_id: 0x04, name: "GAP_RESPONSE", description: "Gap Response", min_length: 20 },
    MessageTypeInfo { type_id: 0x80, name: "SPIN_IMAGE_AVAILABLE", description: "Spin Image Available", min_length: 20 },
    MessageTypeInfo { type_id: 0x81, name: "SPIN_REQUEST", description: "Spin Request", min_length: 20 },
    MessageTypeInfo { type_id: 0x82, name: "SPIN_RESPONSE", description: "Spin Response", min_length: 20 },
    MessageTypeInfo { type_id: 0x83, name: "SPIN_FINISHED", description: "Spin Finished", min_length: 20 },
];

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::heartbeat(SequencedUnitHeader { length: 8, count: 0, unit: 1, sequence: 0 })]
    #[case::data(SequencedUnitHeader { length: 72, count: 3, unit: 2, sequence: 123_456 })]
    #[case::max_values(SequencedUnitHeader { length: u16::MAX, count: u8::MAX, unit: u8::MAX, sequence: u32::MAX })]
    fn test_header_ser_deser(#[case] original: SequencedUnitHeader) {
        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        assert_eq!(buf.len(), SequencedUnitHeader::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        let deser = SequencedUnitHeader::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[test]
    fn test_header_wire_layout_is_little_endian() {
        let header = SequencedUnitHeader { length: 0x0102, count: 3, unit: 4, sequence: 0x05060708 };
        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(buf.as_ref(), &[0x02, 0x01, 3, 4, 0x08, 0x07, 0x06, 0x05]);
    }

    #[test]
    fn test_deser_rejects_truncated_header() {
        let mut b: &[u8] = &[1, 2, 3];
        assert!(SequencedUnitHeader::deser(&mut b).is_err());
    }

    #[rstest]
    #[case::zero_declared_length(0, 20, false)]
    #[case::declared_length_above_max_buf(2049, 2049, false)]
    #[case::declared_length_at_max_buf(2048, 2048, true)]
    #[case::declared_matches_received(100, 100, true)]
    #[case::padding_within_slack(100, 20, true)]
    #[case::padding_at_slack_boundary(120, 20, true)]
    #[case::padding_beyond_slack(121, 20, false)]
    fn test_validate(#[case] declared: u16, #[case] received: usize, #[case] expected: bool) {
        let header = SequencedUnitHeader { length: declared, count: 1, unit: 1, sequence: 1 };
        assert_eq!(header.validate(received, 2048), expected);
    }

    #[rstest]
    #[case::heartbeat(0, 0, 8, PacketType::Heartbeat)]
    #[case::heartbeat_at_boundary(0, 0, 20, PacketType::Heartbeat)]
    #[case::admin_just_above_heartbeat_length(0, 0, 21, PacketType::Admin)]
    #[case::admin(0, 0, 100, PacketType::Admin)]
    #[case::unsequenced(0, 5, 12, PacketType::Unsequenced)]
    #[case::unsequenced_short(0, 1, 10, PacketType::Unsequenced)]
    #[case::data(17, 2, 60, PacketType::Data)]
    #[case::data_regardless_of_count(17, 0, 8, PacketType::Data)]
    fn test_classify(#[case] sequence: u32, #[case] count: u8, #[case] len: usize, #[case] expected: PacketType) {
        assert_eq!(PacketType::classify(sequence, count, len), expected);
    }

    #[test]
    fn test_packet_type_wire_values() {
        assert_eq!(u8::from(PacketType::Heartbeat), 0);
        assert_eq!(u8::from(PacketType::Admin), 1);
        assert_eq!(u8::from(PacketType::Unsequenced), 2);
        assert_eq!(u8::from(PacketType::Data), 3);
        assert_eq!(PacketType::try_from(3u8).unwrap(), PacketType::Data);
        assert!(PacketType::try_from(4u8).is_err());
    }

    #[test]
    fn test_lookup_message_type() {
        let info = lookup_message_type(0x37).unwrap();
        assert_eq!(info.name, "ADD_ORDER");
        assert_eq!(info.min_length, 34);

        assert!(lookup_message_type(0xFF).is_none());
    }
}
