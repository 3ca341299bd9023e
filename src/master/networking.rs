use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt},
    time::Instant,
    };
use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};
use packbytes::FromBytes;
use log::*;
use std::{
    io,
    path::Path,
    boxed::Box,
    collections::{BTreeMap, HashMap},
    sync::{Arc, Weak},
    vec::Vec,
    time::Duration,
    };

use crate::{
    mutex::*,
    utils::{yield_now, array},
    command::{Command, ErrorCode},
    frame::*,
    broadcast::{Broadcast, BroadcastFrame},
    identity::Signature,
    indicator::{Indicator, LedStatus, Fault},
    state::{Lifecycle, RunState},
    };
use super::{
    Error, Config,
    accessing::{Binding, EventHandler, ErrorHandler},
    };



/**
    bus master async implementation

    it owns the point-to-point bus, on which every exchange is serialized, and the broadcast bus drained by [Self::run]
*/
pub struct Master<P, B> {
    /// point-to-point bus, its lock queue is fair so requests are served in order
    link: tokio::sync::Mutex<Link<P>>,
    /// broadcast bus, owned by the task running [Self::run]
    broadcast: tokio::sync::Mutex<B>,
    pub(crate) config: Config,
    lifecycle: Lifecycle,
    /// proxies created by the application, in creation order
    pub(crate) modules: BusyMutex<Vec<Weak<Binding>>>,
    /// signatures announced by slaves since the last discovery, by address
    pub(crate) discovered: BusyMutex<BTreeMap<u16, Signature>>,
    pub(crate) events: BusyMutex<HashMap<(u8, u16), Arc<dyn EventHandler>>>,
    pub(crate) errors: BusyMutex<Option<Arc<dyn ErrorHandler>>>,
    indicator: BusyMutex<Box<dyn Indicator + Send>>,
}

impl<B: Broadcast> Master<SerialPort, B> {
    /// initialize a master on the given serial port file and with the given baud rate
    pub fn open(path: impl AsRef<Path>, rate: u32, broadcast: B, config: Config) -> Result<Self, io::Error> {
        let port = SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
                settings.set_raw();
                settings.set_baud_rate(rate)?;
                settings.set_char_size(CharSize::Bits8);
                settings.set_stop_bits(StopBits::One);
                settings.set_parity(Parity::None);
                Ok(settings)
                })?;
        Ok(Self::new(port, broadcast, config))
    }
}

impl<P: AsyncRead + AsyncWrite + Unpin, B: Broadcast> Master<P, B> {
    /// `port` is the point-to-point bus, `broadcast` the broadcast bus
    pub fn new(port: P, broadcast: B, config: Config) -> Self {
        Self {
            link: tokio::sync::Mutex::new(Link::new(port)),
            broadcast: tokio::sync::Mutex::new(broadcast),
            config,
            lifecycle: Lifecycle::new(),
            modules: BusyMutex::new(Vec::new()),
            discovered: BusyMutex::new(BTreeMap::new()),
            events: BusyMutex::new(HashMap::new()),
            errors: BusyMutex::new(None),
            indicator: BusyMutex::new(Box::new(())),
        }
    }
    pub fn config(&self) -> &Config {&self.config}
    /// LED of the master board, showing addressing and fault patterns
    pub fn set_indicator(&self, indicator: impl Indicator + Send + 'static) {
        *self.indicator.blocking_lock() = Box::new(indicator);
    }
    pub(crate) fn show(&self, status: LedStatus) {
        self.indicator.blocking_lock().show(status);
    }

    pub fn state(&self) -> RunState {self.lifecycle.state()}
    /// resume [Self::run] after [Self::stop]
    pub fn start(&self) {self.lifecycle.start()}
    /// suspend [Self::run] once it has dispatched the broadcast frame it is waiting for
    pub fn stop(&self) {self.lifecycle.stop()}

    /**
        coroutine responsible of receiving everything slaves send on the broadcast bus

        it **must** be running in order to discover slaves and receive their events
    */
    pub async fn run(&self) -> Result<(), Error> {
        let Ok(mut broadcast) = self.broadcast.try_lock()
            else {return Err(Error::Master("run function called twice"))};
        loop {
            self.lifecycle.resumed().await;
            match broadcast.read().await {
                Ok((sender, frame)) => {
                    self.lifecycle.recover();
                    self.dispatch(sender, &frame);
                },
                Err(err) => {
                    warn!("broadcast bus failure: {:?}", err);
                    self.lifecycle.fault();
                    self.show(Fault::Transport.led());
                    yield_now().await;
                },
            }
        }
    }

    fn dispatch(&self, sender: u16, frame: &BroadcastFrame) {
        match frame.command {
            Command::Event => {
                let Some((&event, args)) = frame.args().split_first() else {
                    warn!("empty event from {}", sender);
                    return;
                };
                // released before calling, so the handler can register others
                let handler = self.events.blocking_lock().get(&(event, sender)).cloned();
                match handler {
                    Some(handler) => handler.handle(args),
                    None => warn!("unregistered event {:#04x} from {}", event, sender),
                }
            },
            Command::Discover => match array(frame.args()).map(Signature::from_le_bytes) {
                Some(signature) => {
                    debug!("discovered {} serial {} at {}", signature.board_type, signature.serial_number, sender);
                    self.discovered.blocking_lock().insert(sender, signature);
                },
                None => warn!("malformed discovery answer from {}", sender),
            },
            Command::Error => {
                let code = frame.args().first()
                    .map(|&code| ErrorCode::from(code))
                    .unwrap_or(ErrorCode::Unknown);
                let handler = self.errors.blocking_lock().clone();
                match handler {
                    Some(handler) => handler.handle(sender, code),
                    None => warn!("slave {} reported error {:?}", sender, code),
                }
            },
            other => debug!("ignored broadcast {:?} from {}", other, sender),
        }
    }

    /**
        send a frame and wait for its answer if it requests one, the bus is reserved meanwhile

        bus failures and missing answers show on the master indicator
    */
    pub(crate) async fn exchange(&self, frame: &mut Frame, timeout: Duration) -> Result<(), Error> {
        let result = self.link.lock().await
            .transfer(frame, timeout).await;
        match &result {
            Err(Error::Timeout) => self.show(Fault::Timeout.led()),
            Err(Error::Bus(_)) => self.show(Fault::Transport.led()),
            _ => {},
        }
        result
    }
}


/// point-to-point bus transport on the master side
pub(crate) struct Link<P> {
    port: P,
    receive: Box<[u8; MAX_PAYLOAD]>,
}
impl<P: AsyncRead + AsyncWrite + Unpin> Link<P> {
    pub fn new(port: P) -> Self {
        Self {port, receive: Box::new([0; MAX_PAYLOAD])}
    }
    /// send a frame, failing if the bus does not accept it in time
    pub async fn write(&mut self, frame: &Frame, timeout: Duration) -> Result<(), Error> {
        let header = frame.encode()?;
        let port = &mut self.port;
        let sending = async move {
            port.write_all(&header).await?;
            port.write_all(&frame.payload).await?;
            port.flush().await
        };
        match tokio::time::timeout(timeout, sending).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Bus(io::Error::new(io::ErrorKind::TimedOut, "bus did not accept frame in time"))),
        }
    }
    /// wait for the next valid frame
    pub async fn read(&mut self, timeout: Duration) -> Result<Frame, Error> {
        tokio::time::timeout(timeout, self.receive()).await
            .map_err(|_| Error::Timeout)?
    }
    /**
        send a frame and, if it requests an acknowledgement, wait for the matching response which replaces it

        frames not answering this one (corrupted, from other commands or slaves, pings for other signatures) are skipped. The whole exchange must complete within `timeout`, nothing is retried.
    */
    pub async fn transfer(&mut self, frame: &mut Frame, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        self.write(frame, timeout).await?;
        if !frame.ack
            {return Ok(())}
        loop {
            let received = tokio::time::timeout_at(deadline, self.receive()).await
                .map_err(|_| Error::Timeout)?;
            let reply = match received {
                Ok(reply) => reply,
                Err(Error::Frame(err)) => {
                    debug!("dropped corrupted frame: {}", err);
                    continue
                },
                Err(err) => return Err(err),
            };
            if reply.direction != Direction::Response
            || reply.command != frame.command
            || frame.address != BROADCAST && reply.address != frame.address
            // a ping is answered by echoing the signature it looks for
            || frame.command == Command::Ping && reply.payload != frame.payload
            {
                debug!("skipped unrelated {:?} from {}", reply.command, reply.address);
                continue
            }
            let rejected = reply.error;
            *frame = reply;
            if rejected
                {return Err(Error::Rejected {command: frame.command})}
            return Ok(());
        }
    }
    async fn receive(&mut self) -> Result<Frame, Error> {
        let mut header = [0; HEADER];
        // catch up with the next header
        loop {
            self.port.read_exact(&mut header[.. 1]).await?;
            if header[0] == SYNC
                {break}
        }
        self.port.read_exact(&mut header[1 ..]).await?;
        let header = Header::parse(header)?;
        let payload = &mut self.receive[.. usize::from(header.length)];
        self.port.read_exact(payload).await?;
        Ok(Frame::decode(&header, payload)?)
    }
}
