//! ASCII serial frame codec for the bike's internal control bus.
//!
//! The bike's motor boards speak a Modbus-flavoured ASCII protocol: every
//! frame is a `:` start marker, a run of two-character uppercase hex pairs,
//! an additive checksum pair, and a `\r\n` terminator. Command frames are a
//! fixed 17 bytes on the wire:
//!
//! ```text
//! ':' node func addrHi addrLo valHi valLo cks '\r' '\n'
//!      2    2    2      2      2     2    2
//! ```
//!
//! The checksum is the two's complement of the sum of all preceding hex
//! pairs, so a valid frame's hex pairs (checksum included) sum to zero
//! modulo 256.
//!
//! The physical link runs the controller's UART at 8N1 while the boards
//! expect 7N2, so every outgoing byte has its high bit set (it lands where
//! the first stop bit would) and every incoming byte has its high bit
//! cleared. See [`stuff_7n2`] and [`unstuff_8n1`].

use core::fmt;

/// Start-of-frame marker.
pub const FRAME_START: u8 = b':';

/// Length of an encoded command frame, terminator included.
pub const FRAME_LEN: usize = 17;

/// ASCII offset of the register value inside a read reply, counted from the
/// byte after the start marker: node (2) + function (2) + byte count (2) +
/// first register (4).
const READ_VALUE_OFFSET: usize = 10;

/// Bus node addresses. Each motor board answers on its own address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAddress {
    /// Cadence sensor board.
    Rpm,
    /// Incline motor board.
    Incline,
    /// Resistance motor board.
    Resistance,
}

impl NodeAddress {
    /// The address byte carried on the wire.
    pub const fn as_u8(self) -> u8 {
        match self {
            NodeAddress::Rpm => 0x51,
            NodeAddress::Incline => 0x41,
            NodeAddress::Resistance => 0x61,
        }
    }

    /// Look up a wire address byte.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x51 => Some(NodeAddress::Rpm),
            0x41 => Some(NodeAddress::Incline),
            0x61 => Some(NodeAddress::Resistance),
            _ => None,
        }
    }
}

/// Modbus function codes the boards understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    /// Read a coil bit.
    ReadCoil,
    /// Read a holding register.
    ReadHolding,
    /// Write a coil bit.
    WriteCoil,
    /// Write a holding register.
    WriteHolding,
    /// Write several coil bits.
    WriteMultiCoil,
    /// Write several holding registers.
    WriteMultiHolding,
}

impl FunctionCode {
    /// The function byte carried on the wire.
    pub const fn as_u8(self) -> u8 {
        match self {
            FunctionCode::ReadCoil => 0x01,
            FunctionCode::ReadHolding => 0x03,
            FunctionCode::WriteCoil => 0x05,
            FunctionCode::WriteHolding => 0x06,
            FunctionCode::WriteMultiCoil => 0x0F,
            FunctionCode::WriteMultiHolding => 0x10,
        }
    }

    /// Look up a wire function byte.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(FunctionCode::ReadCoil),
            0x03 => Some(FunctionCode::ReadHolding),
            0x05 => Some(FunctionCode::WriteCoil),
            0x06 => Some(FunctionCode::WriteHolding),
            0x0F => Some(FunctionCode::WriteMultiCoil),
            0x10 => Some(FunctionCode::WriteMultiHolding),
            _ => None,
        }
    }
}

/// A single command frame addressed at one register of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Addressed board.
    pub node: NodeAddress,
    /// What to do with the register.
    pub function: FunctionCode,
    /// Register address.
    pub address: u16,
    /// Register value; zero for reads.
    pub value: u16,
}

impl CommandFrame {
    /// Read one holding register.
    pub const fn read_holding(node: NodeAddress, address: u16) -> Self {
        Self {
            node,
            function: FunctionCode::ReadHolding,
            address,
            value: 0,
        }
    }

    /// Write one holding register.
    pub const fn write_holding(node: NodeAddress, address: u16, value: u16) -> Self {
        Self {
            node,
            function: FunctionCode::WriteHolding,
            address,
            value,
        }
    }

    /// Encode into the fixed 17-byte wire form (unstuffed).
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[0] = FRAME_START;
        put_hex_pair(&mut out[1..3], self.node.as_u8());
        put_hex_pair(&mut out[3..5], self.function.as_u8());
        put_hex_pair(&mut out[5..7], (self.address >> 8) as u8);
        put_hex_pair(&mut out[7..9], (self.address & 0xFF) as u8);
        put_hex_pair(&mut out[9..11], (self.value >> 8) as u8);
        put_hex_pair(&mut out[11..13], (self.value & 0xFF) as u8);
        let cks = checksum(&out[1..13]);
        put_hex_pair(&mut out[13..15], cks);
        out[15] = b'\r';
        out[16] = b'\n';
        out
    }
}

/// A decoded reply from a bus node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Echo of a holding-register write.
    WriteAck { node: NodeAddress },
    /// A 16-bit register value answering a holding-register read.
    Register { node: NodeAddress, value: u16 },
}

/// Frame decode failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// First byte is not the `:` start marker.
    BadStart,
    /// Hex pairs do not sum to zero modulo 256.
    BadChecksum,
    /// Frame is too short or has a dangling half pair.
    BadLength,
    /// Node address outside the known set.
    UnknownNode,
    /// Function code outside the known set, or one we never issue reads for.
    UnknownFunction,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::BadStart => write!(f, "missing frame start marker"),
            CodecError::BadChecksum => write!(f, "checksum mismatch"),
            CodecError::BadLength => write!(f, "truncated frame"),
            CodecError::UnknownNode => write!(f, "unknown node address"),
            CodecError::UnknownFunction => write!(f, "unknown function code"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CodecError {}

/// Additive checksum over a run of ASCII hex pairs: the negated sum of the
/// pair values, modulo 256.
pub fn checksum(hex_pairs: &[u8]) -> u8 {
    let mut sum: u8 = 0;
    for pair in hex_pairs.chunks_exact(2) {
        sum = sum.wrapping_add(hex_pair(pair));
    }
    sum.wrapping_neg()
}

/// Decode a reply frame: either a write echo or a read answer.
///
/// The slice may or may not still carry its `\r\n` terminator; trailing
/// terminator bytes are ignored. Everything between the start marker and
/// the terminator must be hex pairs, checksum pair last.
pub fn decode_reply(raw: &[u8]) -> Result<Reply, CodecError> {
    let payload = frame_payload(raw)?;

    // Shortest valid reply is node + function + checksum.
    if payload.len() < 6 {
        return Err(CodecError::BadLength);
    }
    verify_checksum(payload)?;

    let node = NodeAddress::from_u8(hex_pair(&payload[0..2])).ok_or(CodecError::UnknownNode)?;
    let function =
        FunctionCode::from_u8(hex_pair(&payload[2..4])).ok_or(CodecError::UnknownFunction)?;

    match function {
        FunctionCode::WriteHolding => Ok(Reply::WriteAck { node }),
        FunctionCode::ReadHolding => {
            if payload.len() < READ_VALUE_OFFSET + 4 + 2 {
                return Err(CodecError::BadLength);
            }
            let hi = hex_pair(&payload[READ_VALUE_OFFSET..READ_VALUE_OFFSET + 2]);
            let lo = hex_pair(&payload[READ_VALUE_OFFSET + 2..READ_VALUE_OFFSET + 4]);
            Ok(Reply::Register {
                node,
                value: u16::from_be_bytes([hi, lo]),
            })
        }
        _ => Err(CodecError::UnknownFunction),
    }
}

/// Decode a command frame. The inverse of [`CommandFrame::encode`]; used by
/// bench simulators that play the motor-board side of the bus.
pub fn decode_command(raw: &[u8]) -> Result<CommandFrame, CodecError> {
    let payload = frame_payload(raw)?;
    if payload.len() != 14 {
        return Err(CodecError::BadLength);
    }
    verify_checksum(payload)?;

    let node = NodeAddress::from_u8(hex_pair(&payload[0..2])).ok_or(CodecError::UnknownNode)?;
    let function =
        FunctionCode::from_u8(hex_pair(&payload[2..4])).ok_or(CodecError::UnknownFunction)?;
    let address = u16::from_be_bytes([hex_pair(&payload[4..6]), hex_pair(&payload[6..8])]);
    let value = u16::from_be_bytes([hex_pair(&payload[8..10]), hex_pair(&payload[10..12])]);

    Ok(CommandFrame {
        node,
        function,
        address,
        value,
    })
}

/// Set the high bit of every byte for transmission over the 8N1 UART, so
/// the boards' 7N2 receivers see a clean stop bit.
pub fn stuff_7n2(bytes: &mut [u8]) {
    for b in bytes.iter_mut() {
        *b |= 0x80;
    }
}

/// Clear the high bit of every received byte, undoing the boards' stuffed
/// stop bit.
pub fn unstuff_8n1(bytes: &mut [u8]) {
    for b in bytes.iter_mut() {
        *b &= 0x7F;
    }
}

/// Strip the start marker and any trailing terminator bytes, leaving the
/// run of hex pairs.
fn frame_payload(raw: &[u8]) -> Result<&[u8], CodecError> {
    if raw.first() != Some(&FRAME_START) {
        return Err(CodecError::BadStart);
    }
    let mut payload = &raw[1..];
    while let Some((&last, rest)) = payload.split_last() {
        if last == b'\r' || last == b'\n' {
            payload = rest;
        } else {
            break;
        }
    }
    if payload.len() % 2 != 0 {
        return Err(CodecError::BadLength);
    }
    Ok(payload)
}

fn verify_checksum(payload: &[u8]) -> Result<(), CodecError> {
    let mut sum: u8 = 0;
    for pair in payload.chunks_exact(2) {
        sum = sum.wrapping_add(hex_pair(pair));
    }
    if sum == 0 {
        Ok(())
    } else {
        Err(CodecError::BadChecksum)
    }
}

/// Parse one two-character hex pair. Non-hex characters read as zero, which
/// matches how the boards' firmware treats stray bytes; the checksum still
/// rejects corrupted frames.
fn hex_pair(pair: &[u8]) -> u8 {
    (hex_digit(pair[0]) << 4) | hex_digit(pair[1])
}

fn hex_digit(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'A'..=b'F' => c - b'A' + 10,
        b'a'..=b'f' => c - b'a' + 10,
        _ => 0,
    }
}

fn put_hex_pair(out: &mut [u8], byte: u8) {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    out[0] = DIGITS[(byte >> 4) as usize];
    out[1] = DIGITS[(byte & 0x0F) as usize];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_frame() {
        let frame = CommandFrame::write_holding(NodeAddress::Resistance, 0x0005, 0x003A);
        assert_eq!(&frame.encode(), b":61060005003A5A\r\n");
    }

    #[test]
    fn encode_is_always_17_bytes_with_zero_sum() {
        let frames = [
            CommandFrame::read_holding(NodeAddress::Rpm, 0x0002),
            CommandFrame::write_holding(NodeAddress::Incline, 0x0001, 0x003C),
            CommandFrame::write_holding(NodeAddress::Resistance, 0x0008, 0x00BE),
        ];
        for frame in frames {
            let raw = frame.encode();
            assert_eq!(raw.len(), FRAME_LEN);
            assert_eq!(raw[0], FRAME_START);
            assert_eq!(&raw[15..], b"\r\n");
            let sum: u8 = raw[1..15]
                .chunks_exact(2)
                .map(hex_pair)
                .fold(0u8, |a, b| a.wrapping_add(b));
            assert_eq!(sum, 0, "hex pairs must sum to zero: {frame:?}");
        }
    }

    #[test]
    fn command_round_trip() {
        let frame = CommandFrame::write_holding(NodeAddress::Incline, 0x0007, 0x003C);
        assert_eq!(decode_command(&frame.encode()), Ok(frame));

        let frame = CommandFrame::read_holding(NodeAddress::Rpm, 0x0002);
        assert_eq!(decode_command(&frame.encode()), Ok(frame));
    }

    #[test]
    fn decode_write_echo() {
        // A write echo is byte-identical to the command that caused it.
        let raw = CommandFrame::write_holding(NodeAddress::Incline, 0x0001, 0x0014).encode();
        assert_eq!(
            decode_reply(&raw),
            Ok(Reply::WriteAck {
                node: NodeAddress::Incline
            })
        );
    }

    #[test]
    fn decode_read_reply_extracts_value() {
        // Read answer: node, func, byte count, register value, checksum.
        let reply = build_read_reply(0x51, 0x0041);
        assert_eq!(
            decode_reply(&reply),
            Ok(Reply::Register {
                node: NodeAddress::Rpm,
                value: 0x0041
            })
        );
    }

    #[test]
    fn decode_read_reply_without_terminator() {
        let mut reply = build_read_reply(0x41, 0x0014);
        reply.truncate(reply.len() - 2);
        assert_eq!(
            decode_reply(&reply),
            Ok(Reply::Register {
                node: NodeAddress::Incline,
                value: 0x0014
            })
        );
    }

    #[test]
    fn decode_rejects_bad_start() {
        assert_eq!(decode_reply(b"6103020041\r\n"), Err(CodecError::BadStart));
        assert_eq!(decode_reply(b""), Err(CodecError::BadStart));
    }

    #[test]
    fn decode_rejects_corrupt_checksum() {
        let mut raw = CommandFrame::write_holding(NodeAddress::Incline, 0x0001, 0x0014).encode();
        raw[11] = b'F';
        assert_eq!(decode_reply(&raw), Err(CodecError::BadChecksum));
    }

    #[test]
    fn decode_rejects_unknown_node() {
        let mut reply = build_read_reply(0x22, 0x0001);
        assert_eq!(decode_reply(&reply), Err(CodecError::UnknownNode));
        reply.clear();
        assert_eq!(decode_reply(&reply), Err(CodecError::BadStart));
    }

    #[test]
    fn stuffing_is_involutive() {
        let mut raw = CommandFrame::read_holding(NodeAddress::Rpm, 0x0002).encode();
        let original = raw;
        stuff_7n2(&mut raw);
        assert!(raw.iter().all(|&b| b & 0x80 != 0));
        unstuff_8n1(&mut raw);
        assert_eq!(raw, original);
    }

    /// Build a read reply the way a motor board does: node, function 0x03,
    /// byte count 0x04, two register values, checksum, CRLF.
    fn build_read_reply(node: u8, value: u16) -> Vec<u8> {
        let bytes = [
            node,
            0x03,
            0x04,
            0x00,
            0x00,
            (value >> 8) as u8,
            (value & 0xFF) as u8,
        ];
        let mut out = vec![FRAME_START];
        for b in bytes {
            let mut pair = [0u8; 2];
            put_hex_pair(&mut pair, b);
            out.extend_from_slice(&pair);
        }
        let cks = checksum(&out[1..]);
        let mut pair = [0u8; 2];
        put_hex_pair(&mut pair, cks);
        out.extend_from_slice(&pair);
        out.extend_from_slice(b"\r\n");
        out
    }
}
