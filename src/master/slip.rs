/*!
    SLIP framed packets of the serial bootloader protocol spoken by host flashing tools

    each packet is delimited by [END] bytes, and [END] or [ESC] bytes inside it are escaped
*/

use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes, ByteArray};
use tokio::io::{AsyncRead, AsyncReadExt};
use thiserror::Error;
use std::{
    io,
    boxed::Box,
    vec::Vec,
    };

use crate::pack_bilge;


pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

/// biggest decoded packet accepted from the host
pub const MAX_PACKET: usize = 0x4400;

#[derive(Error, Debug)]
pub enum SlipError {
    #[error("problem with host link")]
    Io(#[from] io::Error),
    #[error("host link closed")]
    Closed,
    #[error("invalid escape sequence {0:#04x}")]
    InvalidEscape(u8),
    #[error("packet exceeds {MAX_PACKET} bytes")]
    TooLarge,
    #[error("packet is too short for its header")]
    Truncated,
    #[error("packet announces {announced} data bytes but carries {received}")]
    Size {announced: usize, received: usize},
}


/// escape the content of a packet, without delimiters
pub fn escape(bytes: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(bytes.len() + bytes.len()/8);
    for &byte in bytes {
        match byte {
            END => escaped.extend_from_slice(&[ESC, ESC_END]),
            ESC => escaped.extend_from_slice(&[ESC, ESC_ESC]),
            other => escaped.push(other),
        }
    }
    escaped
}
/// reverse [escape]
pub fn unescape(bytes: &[u8]) -> Result<Vec<u8>, SlipError> {
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(&byte) = iter.next() {
        decoded.push(match byte {
            ESC => match iter.next() {
                Some(&ESC_END) => END,
                Some(&ESC_ESC) => ESC,
                Some(&other) => return Err(SlipError::InvalidEscape(other)),
                None => return Err(SlipError::Truncated),
            },
            other => other,
        });
    }
    Ok(decoded)
}
/// frame a packet for the wire
pub fn encode(packet: &[u8]) -> Vec<u8> {
    let mut framed = escape(packet);
    framed.insert(0, END);
    framed.push(END);
    framed
}


/// streaming decoder of SLIP packets
pub struct SlipDecoder {
    packet: Vec<u8>,
    escaping: bool,
    chunk: Box<[u8; 512]>,
    start: usize,
    end: usize,
}
impl SlipDecoder {
    pub fn new() -> Self {
        Self {
            packet: Vec::new(),
            escaping: false,
            chunk: Box::new([0; 512]),
            start: 0,
            end: 0,
        }
    }
    /// feed one byte, returning a packet when its end delimiter is reached
    pub fn push(&mut self, byte: u8) -> Result<Option<Vec<u8>>, SlipError> {
        if self.escaping {
            self.escaping = false;
            let decoded = match byte {
                ESC_END => END,
                ESC_ESC => ESC,
                other => {
                    self.packet.clear();
                    return Err(SlipError::InvalidEscape(other));
                },
            };
            return self.store(decoded);
        }
        match byte {
            // empty packets are delimiters back to back
            END if self.packet.is_empty() => Ok(None),
            END => Ok(Some(core::mem::take(&mut self.packet))),
            ESC => {
                self.escaping = true;
                Ok(None)
            },
            other => self.store(other),
        }
    }
    fn store(&mut self, byte: u8) -> Result<Option<Vec<u8>>, SlipError> {
        if self.packet.len() >= MAX_PACKET {
            self.packet.clear();
            return Err(SlipError::TooLarge);
        }
        self.packet.push(byte);
        Ok(None)
    }
    /// wait for the next complete packet on `port`
    pub async fn read<R: AsyncRead + Unpin>(&mut self, port: &mut R) -> Result<Vec<u8>, SlipError> {
        loop {
            while self.start < self.end {
                let byte = self.chunk[self.start];
                self.start += 1;
                if let Some(packet) = self.push(byte)?
                    {return Ok(packet)}
            }
            let size = port.read(&mut self.chunk[..]).await?;
            if size == 0
                {return Err(SlipError::Closed)}
            self.start = 0;
            self.end = size;
        }
    }
}
impl Default for SlipDecoder {
    fn default() -> Self {Self::new()}
}


/// commands of the host bootloader protocol
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq, Eq)]
pub enum HostCommand {
    FlashBegin = 0x02,
    FlashData = 0x03,
    FlashEnd = 0x04,
    MemBegin = 0x05,
    MemEnd = 0x06,
    MemData = 0x07,
    Sync = 0x08,
    WriteReg = 0x09,
    ReadReg = 0x0A,
    SpiSetParams = 0x0B,
    SpiAttach = 0x0D,
    ChangeBaudrate = 0x0F,
    FlashDeflBegin = 0x10,
    FlashDeflData = 0x11,
    FlashDeflEnd = 0x12,
    Md5Check = 0x13,
    GetSecurityInfo = 0x14,
    #[fallback]
    Unknown = 0xFF,
}
pack_bilge!(HostCommand, u8);

/// packet header preceding the data
#[derive(Copy, Clone, Debug, FromBytes, ToBytes)]
struct PacketHeader {
    direction: u8,
    command: HostCommand,
    size: u16,
    value: u32,
}
const PACKET_HEADER: usize = <PacketHeader as FromBytes>::Bytes::SIZE;

/// direction of packets sent by the host
pub const REQUEST: u8 = 0x00;
/// direction of packets sent to the host
pub const RESPONSE: u8 = 0x01;

/// decoded host bootloader packet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPacket {
    pub direction: u8,
    pub command: HostCommand,
    /// checksum of requests, register value of responses
    pub value: u32,
    pub data: Vec<u8>,
}
impl HostPacket {
    /// response to a request
    pub fn response(command: HostCommand, value: u32, data: Vec<u8>) -> Self {
        Self {direction: RESPONSE, command, value, data}
    }
    /// raw packet, before SLIP framing
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = PacketHeader {
            direction: self.direction,
            command: self.command,
            // host packets data is far below 64k
            size: self.data.len() as u16,
            value: self.value,
        };
        let mut bytes = Vec::with_capacity(PACKET_HEADER + self.data.len());
        bytes.extend_from_slice(&header.to_le_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }
    /// parse a raw packet
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SlipError> {
        let header = bytes.get(.. PACKET_HEADER)
            .and_then(|header| <[u8; PACKET_HEADER]>::try_from(header).ok())
            .ok_or(SlipError::Truncated)?;
        let header = PacketHeader::from_le_bytes(header);
        let data = &bytes[PACKET_HEADER ..];
        if data.len() != usize::from(header.size)
            {return Err(SlipError::Size {announced: usize::from(header.size), received: data.len()})}
        Ok(Self {
            direction: header.direction,
            command: header.command,
            value: header.value,
            data: data.to_vec(),
        })
    }
}
