/*!
    point-to-point frames exchanged on the multi-drop serial bus

    on the wire, a frame is a 7 bytes little endian [Header] followed by its payload. The header starts with [SYNC] so a reader can catch up with the byte stream after a loss, and ends with a checksum covering the rest of the header and the payload.
*/

use core::fmt;
use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes, ByteArray};

use crate::{
    pack_bilge,
    command::Command,
    };


/// first byte of every header
pub const SYNC: u8 = 0xAA;
/// header size on the wire
pub const HEADER: usize = <Header as FromBytes>::Bytes::SIZE;
/// maximum payload size
pub const MAX_PAYLOAD: usize = 1024;
/// biggest address that fits the header
pub const MAX_ADDRESS: u16 = 0x7FF;
/// address targeting every slave at once
pub const BROADCAST: u16 = 0;
/// marker of a logical address not assigned yet
pub const UNASSIGNED: u16 = 0xFFFF;

/// owned frame payload
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;
/// payload of a generic request once its sub-opcode is removed
pub type RequestPayload = heapless::Vec<u8, {MAX_PAYLOAD - 1}>;


/// frame header as it is laid on the wire
#[derive(Copy, Clone, FromBytes, ToBytes, Debug)]
pub struct Header {
    pub sync: u8,
    pub command: Command,
    pub flags: Flags,
    /// number of payload bytes following the header
    pub length: u16,
    /// xor of `0xFE` with the header bytes between sync and checksum, and with the payload
    pub checksum: u8,
}

#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct Flags {
    /// logical address of the targeted slave for requests, of the answering slave for responses
    pub address: u11,
    /// set on requests from master to slave, cleared on responses
    pub request: bool,
    /// the sender expects a response
    pub ack: bool,
    /// set by a responder that could not serve the request
    pub error: bool,
    reserved: u2,
}
pack_bilge!(Flags, u16);

impl Header {
    /// decode a header and check what can be checked without its payload
    pub fn parse(bytes: [u8; HEADER]) -> Result<Self, FrameError> {
        let header = Self::from_le_bytes(bytes);
        if header.sync != SYNC
            {return Err(FrameError::Sync(header.sync))}
        if usize::from(header.length) > MAX_PAYLOAD
            {return Err(FrameError::Length(header.length))}
        Ok(header)
    }
    /// checksum of this header with the given payload
    pub fn checksum(&self, payload: &[u8]) -> u8 {
        let bytes = self.to_le_bytes();
        checksum(0xFE, &bytes[1 .. HEADER-1]) ^ checksum(0, payload)
    }
}

fn checksum(seed: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(seed, |sum, byte| sum ^ byte)
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// from master to slave
    Request,
    /// from slave to master
    Response,
}

/// addressed frame, the unit of exchange on the point-to-point bus
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub address: u16,
    pub direction: Direction,
    pub ack: bool,
    pub error: bool,
    pub payload: Payload,
}
impl Frame {
    /// empty request without acknowledgement
    pub fn new(command: Command, address: u16) -> Self {
        Self {
            command,
            address,
            direction: Direction::Request,
            ack: false,
            error: false,
            payload: Payload::new(),
        }
    }
    pub fn with_ack(mut self, ack: bool) -> Self {
        self.ack = ack;
        self
    }
    pub fn with_payload(mut self, payload: &[u8]) -> Result<Self, FrameError> {
        self.payload.clear();
        self.payload.extend_from_slice(payload)
            .map_err(|_| FrameError::TooLong(payload.len()))?;
        Ok(self)
    }
    /// generic request carrying `data` for the peripheral driver owning `opcode`
    pub fn request(address: u16, opcode: u8, data: &[u8], ack: bool) -> Result<Self, FrameError> {
        let mut frame = Self::new(Command::Request, address).with_ack(ack);
        if data.len() >= MAX_PAYLOAD
            {return Err(FrameError::TooLong(data.len() + 1))}
        frame.payload.push(opcode).map_err(|_| FrameError::TooLong(1))?;
        frame.payload.extend_from_slice(data)
            .map_err(|_| FrameError::TooLong(data.len() + 1))?;
        Ok(frame)
    }
    /// split a generic request payload into sub-opcode and driver data
    pub fn opcode(&self) -> Option<(u8, &[u8])> {
        self.payload.split_first().map(|(&opcode, data)| (opcode, data))
    }
    /// empty response to this frame, sent from the given address
    pub fn respond(&self, address: u16) -> Self {
        Self {
            command: self.command,
            address,
            direction: Direction::Response,
            ack: false,
            error: false,
            payload: Payload::new(),
        }
    }

    /// wire header of this frame, failing if the frame cannot be represented
    pub fn header(&self) -> Result<Header, FrameError> {
        if self.address > MAX_ADDRESS
            {return Err(FrameError::Address(self.address))}
        let mut flags = Flags::from(0u16);
        flags.set_address(u11::new(self.address));
        flags.set_request(self.direction == Direction::Request);
        flags.set_ack(self.ack);
        flags.set_error(self.error);
        let mut header = Header {
            sync: SYNC,
            command: self.command,
            flags,
            // payload capacity fits in u16
            length: self.payload.len() as u16,
            checksum: 0,
        };
        header.checksum = header.checksum(&self.payload);
        Ok(header)
    }
    /// header bytes to send before the payload
    pub fn encode(&self) -> Result<[u8; HEADER], FrameError> {
        Ok(self.header()?.to_le_bytes())
    }
    /// rebuild a frame from a header received by [Header::parse] and the payload following it
    pub fn decode(header: &Header, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() != usize::from(header.length)
            {return Err(FrameError::Length(header.length))}
        let expected = header.checksum(payload);
        if expected != header.checksum
            {return Err(FrameError::Checksum {expected, received: header.checksum})}
        Ok(Self {
            command: header.command,
            address: header.flags.address().value(),
            direction: if header.flags.request() {Direction::Request} else {Direction::Response},
            ack: header.flags.ack(),
            error: header.flags.error(),
            payload: Payload::from_slice(payload)
                .map_err(|_| FrameError::Length(header.length))?,
        })
    }
    /// decode a frame at the start of a contiguous buffer, returning it with the number of bytes it spans
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), FrameError> {
        let raw = bytes.get(.. HEADER)
            .and_then(|raw| <[u8; HEADER]>::try_from(raw).ok())
            .ok_or(FrameError::Truncated)?;
        let header = Header::parse(raw)?;
        let end = HEADER + usize::from(header.length);
        let payload = bytes.get(HEADER .. end).ok_or(FrameError::Truncated)?;
        Ok((Self::decode(&header, payload)?, end))
    }
}


/// reasons a frame cannot be received or sent
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// header does not start with [SYNC]
    Sync(u8),
    /// announced payload does not fit
    Length(u16),
    Checksum {expected: u8, received: u8},
    /// logical address does not fit the header
    Address(u16),
    /// payload exceeds [MAX_PAYLOAD]
    TooLong(usize),
    /// buffer ends before the frame
    Truncated,
}
impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(byte) => write!(f, "expected sync byte, got {:#04x}", byte),
            Self::Length(length) => write!(f, "invalid payload length {}", length),
            Self::Checksum {expected, received} => write!(f, "checksum mismatch, expected {:#04x} received {:#04x}", expected, received),
            Self::Address(address) => write!(f, "address {:#x} cannot be sent on the bus", address),
            Self::TooLong(size) => write!(f, "payload of {} bytes exceeds {}", size, MAX_PAYLOAD),
            Self::Truncated => write!(f, "frame is truncated"),
        }
    }
}
impl core::error::Error for FrameError {}


#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn wire(frame: &Frame) -> Vec<u8> {
        let mut bytes = frame.encode().unwrap().to_vec();
        bytes.extend_from_slice(&frame.payload);
        bytes
    }

    #[test]
    fn header_layout() {
        let frame = Frame::new(Command::Ping, 0x123)
            .with_ack(true)
            .with_payload(&[1, 2, 3])
            .unwrap();
        let bytes = wire(&frame);
        assert_eq!(HEADER, 7);
        assert_eq!(bytes[0], SYNC);
        assert_eq!(bytes[1], 0x02);
        // address 0x123, request bit 11, ack bit 12
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 0x123 | 1<<11 | 1<<12);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 3);
        let expected = 0xFE ^ bytes[1] ^ bytes[2] ^ bytes[3] ^ bytes[4] ^ bytes[5] ^ 1 ^ 2 ^ 3;
        assert_eq!(bytes[6], expected);
    }

    #[test]
    fn wire_round_trip() {
        let mut frame = Frame::new(Command::BoardInfo, 12).with_payload(&[0xAA; 40]).unwrap();
        frame.direction = Direction::Response;
        frame.error = true;
        let bytes = wire(&frame);
        let (decoded, size) = Frame::parse(&bytes).unwrap();
        assert_eq!(size, bytes.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn request_envelope() {
        let data = [0x10, 0xC0, 0xDB, 0x00];
        let frame = Frame::request(5, 0x4E, &data, true).unwrap();
        assert_eq!(frame.command, Command::Request);
        assert_eq!(frame.payload.len(), data.len() + 1);
        assert_eq!(frame.opcode(), Some((0x4E, &data[..])));

        let (decoded, _) = Frame::parse(&wire(&frame)).unwrap();
        assert_eq!(decoded.opcode(), Some((0x4E, &data[..])));

        let empty = Frame::request(5, 0x20, &[], false).unwrap();
        assert_eq!(empty.opcode(), Some((0x20, &[][..])));
        assert!(Frame::request(5, 0, &[0; MAX_PAYLOAD], true).is_err());
        assert!(Frame::request(5, 0, &[0; MAX_PAYLOAD-1], true).is_ok());
    }

    #[test]
    fn corrupted() {
        let frame = Frame::new(Command::Restart, 3).with_payload(&[9, 8, 7]).unwrap();
        let mut bytes = wire(&frame);
        bytes[8] ^= 0x40;
        assert!(matches!(Frame::parse(&bytes), Err(FrameError::Checksum {..})));

        let mut bytes = wire(&frame);
        bytes[0] = 0x55;
        assert_eq!(Frame::parse(&bytes), Err(FrameError::Sync(0x55)));

        let mut bytes = wire(&frame);
        bytes[5] = 0x10;
        assert_eq!(Frame::parse(&bytes), Err(FrameError::Length(0x1000 | 3)));

        assert_eq!(Frame::parse(&wire(&frame)[.. 9]), Err(FrameError::Truncated));
    }

    #[test]
    fn unassigned_address_is_not_encodable() {
        let frame = Frame::new(Command::Nop, UNASSIGNED);
        assert_eq!(frame.encode(), Err(FrameError::Address(UNASSIGNED)));
        assert!(Frame::new(Command::Nop, MAX_ADDRESS).encode().is_ok());
    }

    #[test]
    fn response() {
        let request = Frame::request(7, 1, &[2], true).unwrap();
        let response = request.respond(7);
        assert_eq!(response.command, Command::Request);
        assert_eq!(response.direction, Direction::Response);
        assert!(!response.ack);
        assert!(response.payload.is_empty());
    }
}
