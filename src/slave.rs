/*!
    slave side of the bus, for `no_std` firmwares

    A [Slave] serves the point-to-point bus in its [Slave::run] loop: it answers system commands directly, forwards generic requests to the handlers registered by peripheral drivers, and lets the master reflash the board through [Flash]. Events are raised on the broadcast bus with [Slave::send_event].
*/

use core::sync::atomic::{AtomicU16, Ordering::*};
use packbytes::{FromBytes, ToBytes};
use embedded_io_async::{Read, Write, ReadExactError};
use log::*;

use crate::{
    mutex::*,
    utils::{yield_now, array},
    command::{Command, ErrorCode},
    frame::*,
    broadcast::{Broadcast, BroadcastFrame, ARGS},
    identity::{Identity, Signature, BoardInfo, StringArray},
    indicator::{Indicator, LedStatus, Fault},
    state::{Lifecycle, RunState},
    };


/// maximum number of request handlers a slave can hold
pub const MAX_HANDLERS: usize = 64;

/// services the board support package provides to the slave
pub trait Board: Indicator {
    /// identity burnt in the board at manufacture
    fn identity(&self) -> Identity;
    fn software_version(&self) -> &str;
    /// averaged voltage on the address pin, set by the position of the board on the rail
    fn address_millivolts(&mut self) -> u16;
    /// reboot the board, usually never returns
    fn restart(&mut self);
    /// run the reset hooks of the peripheral drivers
    fn reset(&mut self);
    fn read_register(&mut self, address: u32) -> u32;
}

/// firmware storage written during a firmware relay session
pub trait Flash {
    /// prepare the update partition
    fn begin(&mut self) -> Result<(), FlashError>;
    /// append a chunk of the new image
    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError>;
    /// md5 digest of the first `size` bytes written
    fn check(&mut self, size: u32) -> Result<[u8; 16], FlashError>;
    /// mark the new image bootable
    fn end(&mut self) -> Result<(), FlashError>;
}
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlashError {
    /// no update session is open
    NotStarted,
    /// the storage refused the operation
    Storage,
    /// the written image is invalid
    Invalid,
}

/**
    handler of generic requests for one sub-opcode

    it receives the request payload with its sub-opcode removed, and rewrites it in place to form the response payload
*/
pub trait RequestHandler {
    fn handle(&self, payload: &mut RequestPayload);
}
impl<F: Fn(&mut RequestPayload)> RequestHandler for F {
    fn handle(&self, payload: &mut RequestPayload) {
        self(payload)
    }
}

#[derive(Debug)]
pub enum Error<E> {
    /// underlying transport failure
    Io(E),
    /// the transport closed
    Eof,
    /// a received frame was corrupted, or a response could not be encoded
    Frame(FrameError),
    /// the slave has no logical address to send from
    Unaddressed,
    /// arguments do not fit a broadcast frame
    TooLong,
}
impl<E> From<FrameError> for Error<E> {
    fn from(error: FrameError) -> Self {Self::Frame(error)}
}

/**
    logical address derived from the address pin voltage

    10 significant bits are kept out of the 12 bits ADC range. Readings falling on the broadcast address, or above the biggest address, leave the slave unaddressed.
*/
pub fn provisional_address(millivolts: u16) -> Option<u16> {
    let address = millivolts >> 2;
    if address == BROADCAST || address > MAX_ADDRESS
        {None}
    else
        {Some(address)}
}


pub struct Slave<'a, P, C, D> {
    control: BusyMutex<SlaveControl<P, D>>,
    broadcast: BusyMutex<C>,
    handlers: heapless::LinearMap<u8, &'a dyn RequestHandler, MAX_HANDLERS>,
    identity: Identity,
    /// logical address, [UNASSIGNED] if none
    address: AtomicU16,
    lifecycle: Lifecycle,
}
struct SlaveControl<P, D> {
    port: P,
    board: D,
    receive: [u8; MAX_PAYLOAD],
}

impl<'a, P: Read + Write, C: Broadcast, D: Board + Flash> Slave<'a, P, C, D> {
    /// `port` is the point-to-point bus, `broadcast` the broadcast bus
    pub fn new(port: P, broadcast: C, mut board: D) -> Self {
        let identity = board.identity();
        let address = provisional_address(board.address_millivolts());
        info!("slave {} serial {} starting at address {:?}", identity.board_type, identity.serial_number, address);
        Self {
            control: BusyMutex::new(SlaveControl {
                port,
                board,
                receive: [0; MAX_PAYLOAD],
            }),
            broadcast: BusyMutex::new(broadcast),
            handlers: heapless::LinearMap::new(),
            identity,
            address: AtomicU16::new(address.unwrap_or(UNASSIGNED)),
            lifecycle: Lifecycle::new(),
        }
    }
    /**
        register the handler of a generic request sub-opcode, replacing any previous one

        handlers are installed at boot before [Self::run], the handler is given back if the table is full
    */
    pub fn on_request(&mut self, opcode: u8, handler: &'a dyn RequestHandler) -> Result<(), &'a dyn RequestHandler> {
        self.handlers.insert(opcode, handler)
            .map(|_| ())
            .map_err(|(_, handler)| handler)
    }

    pub fn identity(&self) -> Identity {self.identity}
    pub fn address(&self) -> Option<u16> {
        match self.address.load(Relaxed) {
            UNASSIGNED => None,
            address => Some(address),
        }
    }
    /// override the logical address, `None` makes the slave unaddressed
    pub fn set_address(&self, address: Option<u16>) {
        let address = address.filter(|&address| address != BROADCAST && address <= MAX_ADDRESS);
        self.address.store(address.unwrap_or(UNASSIGNED), Relaxed);
    }
    pub fn state(&self) -> RunState {self.lifecycle.state()}
    /// resume [Self::run] after [Self::stop]
    pub fn start(&self) {self.lifecycle.start()}
    /// suspend [Self::run] once it has served the frame it is waiting for
    pub fn stop(&self) {self.lifecycle.stop()}

    /**
        serve the point-to-point bus forever

        it **must** be running for the master to reach this slave. Bus failures never end it, they only mark the slave's state and indicator.
    */
    pub async fn run(&self) {
        let Some(mut control) = self.control.try_lock()
            else {return};
        loop {
            self.lifecycle.resumed().await;
            let result = match control.receive().await {
                Ok(frame) => self.process(&mut control, frame).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => self.lifecycle.recover(),
                Err(Error::Frame(err)) => warn!("dropped frame: {}", err),
                Err(err) => {
                    error!("bus failure: {:?}", err);
                    self.lifecycle.fault();
                    control.board.show(Fault::Transport.led());
                    yield_now().await;
                },
            }
        }
    }

    /// raise an event on the broadcast bus, `args` can be up to 6 bytes
    pub async fn send_event(&self, event: u8, args: &[u8]) -> Result<(), Error<C::Error>> {
        let mut bytes = heapless::Vec::<u8, ARGS>::new();
        bytes.push(event).map_err(|_| Error::TooLong)?;
        bytes.extend_from_slice(args).map_err(|_| Error::TooLong)?;
        self.broadcast_frame(Command::Event, &bytes).await
    }
    /// report an error on the broadcast bus
    pub async fn send_error(&self, code: ErrorCode) -> Result<(), Error<C::Error>> {
        self.broadcast_frame(Command::Error, &[u8::from(code)]).await
    }
    async fn broadcast_frame(&self, command: Command, args: &[u8]) -> Result<(), Error<C::Error>> {
        let address = self.address().ok_or(Error::Unaddressed)?;
        let frame = BroadcastFrame::new(command, args).ok_or(Error::TooLong)?;
        self.broadcast.lock().await
            .write(address, &frame).await
            .map_err(Error::Io)
    }

    async fn process(&self, control: &mut SlaveControl<P, D>, frame: Frame) -> Result<(), Error<P::Error>> {
        // responses of other slaves travel on the same wires
        if frame.direction != Direction::Request
            {return Ok(())}
        let address = self.address();
        let targeted = address == Some(frame.address);
        if !targeted && frame.address != BROADCAST
            {return Ok(())}
        debug!("received {:?} for {}", frame.command, frame.address);

        let mut reply = frame.respond(address.unwrap_or(UNASSIGNED));
        // broadcast requests are not answered, they would collide on the bus
        let mut answer = targeted && frame.ack;

        match frame.command {
            Command::Nop | Command::Heartbeat => {},
            Command::Ping => {
                // the only broadcast request answered: only one slave can match
                let matching = array(&frame.payload).map(Signature::from_le_bytes)
                    .is_some_and(|signature| signature == self.identity.signature());
                answer = matching && address.is_some() && frame.ack;
                reply.payload = frame.payload.clone();
            },
            Command::Discover => self.announce().await,
            Command::LedStatus => match LedStatus::from_bytes(&frame.payload) {
                Some(status) => control.board.show(status),
                None => reply.error = true,
            },
            Command::BoardInfo => {
                let info = BoardInfo {
                    identity: self.identity,
                    software_version: StringArray::try_from(control.board.software_version())
                        .unwrap_or_default(),
                };
                fill(&mut reply.payload, &info.to_le_bytes())?;
            },
            Command::Restart => {
                if answer {
                    control.send(&reply).await?;
                }
                control.board.restart();
                return Ok(());
            },
            Command::Reset => control.board.reset(),
            Command::ReadRegister => match array(&frame.payload) {
                Some(register) => {
                    let value = control.board.read_register(u32::from_le_bytes(register));
                    fill(&mut reply.payload, &value.to_le_bytes())?;
                },
                None => reply.error = true,
            },
            Command::Request => self.request(control, &frame, &mut reply)?,
            Command::RelayBegin => {
                info!("firmware update starting");
                reply.error = control.board.begin().is_err();
            },
            Command::RelayWrite => {
                reply.error = control.board.write(&frame.payload).is_err();
            },
            Command::RelayCheck => match array(&frame.payload) {
                Some(size) => match control.board.check(u32::from_le_bytes(size)) {
                    Ok(digest) => fill(&mut reply.payload, &digest)?,
                    Err(err) => {
                        warn!("firmware check failed: {:?}", err);
                        reply.error = true;
                    },
                },
                None => reply.error = true,
            },
            Command::RelayEnd => {
                let result = control.board.end();
                reply.error = result.is_err();
                if answer {
                    control.send(&reply).await?;
                }
                match result {
                    Ok(()) => {
                        info!("firmware updated, restarting");
                        control.board.restart();
                    },
                    Err(err) => warn!("firmware update not finalized: {:?}", err),
                }
                return Ok(());
            },
            Command::Event | Command::Error | Command::Unknown => {
                warn!("ignored command {:?}", frame.command);
                return Ok(());
            },
        }
        if answer {
            control.send(&reply).await?;
        }
        Ok(())
    }

    fn request(&self, control: &mut SlaveControl<P, D>, frame: &Frame, reply: &mut Frame) -> Result<(), FrameError> {
        let Some((opcode, data)) = frame.opcode() else {
            warn!("empty generic request");
            reply.error = true;
            return Ok(());
        };
        let Some(handler) = self.handlers.get(&opcode) else {
            warn!("no handler for request opcode {:#04x}", opcode);
            control.board.show(Fault::UnknownOpcode.led());
            reply.error = true;
            reply.payload = frame.payload.clone();
            return Ok(());
        };
        let mut payload = RequestPayload::new();
        payload.extend_from_slice(data)
            .map_err(|_| FrameError::TooLong(data.len()))?;
        handler.handle(&mut payload);
        fill(&mut reply.payload, &[opcode])?;
        fill(&mut reply.payload, &payload)
    }

    /// answer a discovery with this slave's signature on the broadcast bus
    async fn announce(&self) {
        let Some(address) = self.address() else {
            warn!("unaddressed slave cannot answer discovery");
            return;
        };
        let Some(frame) = BroadcastFrame::new(Command::Discover, &self.identity.signature().to_le_bytes())
            else {return};
        if let Err(err) = self.broadcast.lock().await.write(address, &frame).await {
            warn!("discovery answer failed: {:?}", err);
        }
    }
}

impl<P: Read + Write, D> SlaveControl<P, D> {
    async fn receive(&mut self) -> Result<Frame, Error<P::Error>> {
        let mut header = [0; HEADER];
        // catch up with the next header
        loop {
            no_eof(self.port.read_exact(&mut header[.. 1]).await)?;
            if header[0] == SYNC
                {break}
            debug!("catching up header");
        }
        no_eof(self.port.read_exact(&mut header[1 ..]).await)?;
        let header = Header::parse(header)?;
        let payload = &mut self.receive[.. usize::from(header.length)];
        no_eof(self.port.read_exact(payload).await)?;
        Ok(Frame::decode(&header, payload)?)
    }
    async fn send(&mut self, frame: &Frame) -> Result<(), Error<P::Error>> {
        let header = frame.encode()?;
        self.port.write_all(&header).await.map_err(Error::Io)?;
        self.port.write_all(&frame.payload).await.map_err(Error::Io)?;
        self.port.flush().await.map_err(Error::Io)
    }
}

fn fill(payload: &mut Payload, bytes: &[u8]) -> Result<(), FrameError> {
    payload.extend_from_slice(bytes)
        .map_err(|_| FrameError::TooLong(payload.len() + bytes.len()))
}

/// end of file is not expected on a uart, but it is reported rather than assumed impossible
fn no_eof<T, E>(result: Result<T, ReadExactError<E>>) -> Result<T, Error<E>> {
    result.map_err(|e| match e {
        ReadExactError::UnexpectedEof => Error::Eof,
        ReadExactError::Other(io) => Error::Io(io),
        })
}
