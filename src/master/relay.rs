/*!
    relay of a firmware update from a host flashing tool to a slave

    the host speaks the serial bootloader protocol of [slip](super::slip) to the master, which forwards the image to the slave on the point-to-point bus. The slave writes it using its [Flash](crate::slave::Flash) and restarts on the new firmware.
*/

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};
use log::*;
use std::{
    io,
    path::Path,
    boxed::Box,
    vec::Vec,
    };

use crate::{
    command::Command,
    frame::{Frame, MAX_PAYLOAD},
    broadcast::Broadcast,
    identity::BoardType,
    indicator::{LedStatus, Color, Fault},
    utils::array,
    };
use super::{
    Error,
    networking::Master,
    slip::{self, SlipDecoder, SlipError, HostPacket, HostCommand, REQUEST},
    };


/// rate the host switches to when it requests a baud rate change without giving one
pub const DEFAULT_HOST_RATE: u32 = 921_600;
/// size of the header preceding the image in flash data packets
const DATA_HEADER: usize = 16;
/// number of answers to a host synchronization
const SYNC_ANSWERS: usize = 8;
/// status code of an invalid host packet
const INVALID_MESSAGE: u8 = 0x05;

/// step of the relay session, reported when it aborts
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Begin,
    Write,
    Check,
    End,
}

/// serial link to the host flashing tool
pub trait HostPort: AsyncRead + AsyncWrite + Unpin {
    fn set_baud_rate(&mut self, rate: u32) -> io::Result<()>;
}
impl HostPort for SerialPort {
    fn set_baud_rate(&mut self, rate: u32) -> io::Result<()> {
        let mut settings = self.get_configuration()?;
        settings.set_baud_rate(rate)?;
        self.set_configuration(&settings)
    }
}

/// open the serial link to the host flashing tool
pub fn open_host(path: impl AsRef<Path>, rate: u32) -> Result<SerialPort, io::Error> {
    SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
        settings.set_raw();
        settings.set_baud_rate(rate)?;
        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::One);
        settings.set_parity(Parity::None);
        Ok(settings)
        })
}


impl<P: AsyncRead + AsyncWrite + Unpin, B: Broadcast> Master<P, B> {
    /**
        reflash the slave at `address` with the image sent by a host flashing tool on `host`

        the session ends when the host finishes the update, the slave then restarts. Any failure aborts the session where it is, leaving the slave's flash to its own bootloader.
    */
    pub async fn relay_firmware<H: HostPort>(&self, address: u16, host: &mut H) -> Result<(), Error> {
        info!("relaying firmware update to {}", address);
        self.show(LedStatus::Blink(Color::White, 1000));
        let mut session = Session {
            master: self,
            address,
            state: RelayState::Idle,
            decoder: SlipDecoder::new(),
        };
        match session.serve(host).await {
            Ok(()) => {
                info!("firmware update of {} done", address);
                self.show(LedStatus::Off);
                Ok(())
            },
            Err(err) => {
                error!("firmware update of {} aborted during {:?}: {}", address, session.state, err);
                self.show(Fault::RelayAbort.led());
                Err(Error::RelayAbort {step: session.state, source: Box::new(err)})
            },
        }
    }
    /// find a slave by its signature and relay a firmware update to it
    pub async fn program<H: HostPort>(&self, board_type: BoardType, serial_number: u32, host: &mut H) -> Result<(), Error> {
        let address = self.ping(board_type, serial_number).await?;
        self.relay_firmware(address, host).await
    }
}


/// state of one relay session, its buffers are released with it on every exit
struct Session<'m, P, B> {
    master: &'m Master<P, B>,
    address: u16,
    state: RelayState,
    decoder: SlipDecoder,
}
impl<P: AsyncRead + AsyncWrite + Unpin, B: Broadcast> Session<'_, P, B> {
    async fn serve<H: HostPort>(&mut self, host: &mut H) -> Result<(), Error> {
        self.state = RelayState::Begin;
        let mut frame = Frame::new(Command::RelayBegin, self.address).with_ack(true);
        self.master.exchange(&mut frame, self.master.config.relay_begin).await?;

        loop {
            let raw = match self.decoder.read(host).await {
                Ok(raw) => raw,
                Err(err @ (SlipError::Io(_) | SlipError::Closed)) => return Err(err.into()),
                Err(err) => {
                    warn!("dropped host packet: {}", err);
                    continue
                },
            };
            let packet = match HostPacket::from_bytes(&raw) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!("dropped host packet: {}", err);
                    continue
                },
            };
            if packet.direction != REQUEST {
                debug!("ignored host packet of direction {}", packet.direction);
                continue
            }
            debug!("host sent {:?} with {} bytes", packet.command, packet.data.len());

            match packet.command {
                HostCommand::Sync => {
                    for _ in 0 .. SYNC_ANSWERS {
                        answer(host, packet.command, 0, status(true)).await?;
                    }
                },
                HostCommand::FlashData => {
                    let written = match image(&packet.data) {
                        Some(image) => {
                            self.write(image).await?;
                            true
                        },
                        None => {
                            warn!("malformed flash data packet");
                            false
                        },
                    };
                    answer(host, packet.command, 0, status(written)).await?;
                },
                HostCommand::ReadReg => match word(&packet.data, 0) {
                    Some(register) => {
                        let value = self.master.read_register_within(self.address, register, self.master.config.relay_register).await?;
                        answer(host, packet.command, value, status(true)).await?;
                    },
                    None => answer(host, packet.command, 0, status(false)).await?,
                },
                HostCommand::Md5Check => match word(&packet.data, 4) {
                    Some(size) => {
                        let mut data = self.check(size).await?.to_vec();
                        data.extend_from_slice(&[0, 0]);
                        answer(host, packet.command, 0, data).await?;
                    },
                    None => answer(host, packet.command, 0, status(false)).await?,
                },
                HostCommand::ChangeBaudrate => {
                    answer(host, packet.command, 0, status(true)).await?;
                    let rate = word(&packet.data, 0)
                        .filter(|&rate| rate != 0)
                        .unwrap_or(DEFAULT_HOST_RATE);
                    info!("host link switching to {} bauds", rate);
                    host.set_baud_rate(rate)?;
                },
                HostCommand::FlashEnd => {
                    self.state = RelayState::End;
                    let mut frame = Frame::new(Command::RelayEnd, self.address);
                    self.master.exchange(&mut frame, self.master.config.relay_write).await?;
                    answer(host, packet.command, 0, status(true)).await?;
                    return Ok(());
                },
                _ => answer(host, packet.command, 0, status(true)).await?,
            }
        }
    }

    /// send an image in chunks, each acknowledged before the next
    async fn write(&mut self, image: &[u8]) -> Result<(), Error> {
        self.state = RelayState::Write;
        for chunk in image.chunks(MAX_PAYLOAD) {
            let mut frame = Frame::new(Command::RelayWrite, self.address)
                .with_ack(true)
                .with_payload(chunk)?;
            self.master.exchange(&mut frame, self.master.config.relay_write).await?;
        }
        Ok(())
    }
    /// digest of the first `size` bytes written on the slave
    async fn check(&mut self, size: u32) -> Result<[u8; 16], Error> {
        self.state = RelayState::Check;
        let mut frame = Frame::new(Command::RelayCheck, self.address)
            .with_ack(true)
            .with_payload(&size.to_le_bytes())?;
        self.master.exchange(&mut frame, self.master.config.relay_check).await?;
        array(&frame.payload).ok_or(Error::Master("firmware digest has wrong size"))
    }
}

/// image carried by a flash data packet
fn image(data: &[u8]) -> Option<&[u8]> {
    let size = usize::try_from(word(data, 0)?).ok()?;
    data.get(DATA_HEADER .. DATA_HEADER.checked_add(size)?)
}
fn word(data: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(array(data.get(offset ..)?)?))
}
/// status block ending host responses
fn status(success: bool) -> Vec<u8> {
    if success
        {std::vec![0; 4]}
    else
        {std::vec![1, INVALID_MESSAGE, 0, 0]}
}
async fn answer<H: HostPort>(host: &mut H, command: HostCommand, value: u32, data: Vec<u8>) -> Result<(), Error> {
    let packet = HostPacket::response(command, value, data);
    let sending = async {
        host.write_all(&slip::encode(&packet.to_bytes())).await?;
        host.flush().await
    };
    Ok(sending.await.map_err(SlipError::Io)?)
}
