#![allow(dead_code)]

use std::{
    future::{Future, poll_fn},
    pin::Pin,
    sync::{Arc, Mutex},
    task::Poll,
    time::Duration,
    collections::HashMap,
    };
use futures_concurrency::future::Race;
use tokio::io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf, duplex, split};
use embedded_io_async::ErrorKind;

use railbus::{
    frame::{Frame, FrameError, RequestPayload},
    broadcast::{Loopback, LoopbackEndpoint},
    identity::{BoardType, Identity},
    indicator::{Indicator, LedStatus},
    slave::{Slave, Board, Flash, FlashError, RequestHandler},
    master::{Master, Config},
    };


pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// tokio stream seen as an embedded uart
pub struct Port<T>(pub T);

impl<T> embedded_io_async::ErrorType for Port<T> {
    type Error = ErrorKind;
}
impl<T: AsyncRead + Unpin> embedded_io_async::Read for Port<T> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        self.0.read(buf).await.map_err(|_| ErrorKind::Other)
    }
}
impl<T: AsyncWrite + Unpin> embedded_io_async::Write for Port<T> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
        self.0.write(buf).await.map_err(|_| ErrorKind::Other)
    }
    async fn flush(&mut self) -> Result<(), ErrorKind> {
        self.0.flush().await.map_err(|_| ErrorKind::Other)
    }
}


/// frames written on the multi-drop bus, in the order they completed
#[derive(Clone, Default)]
pub struct BusLog {
    inner: Arc<Mutex<LogState>>,
}
#[derive(Default)]
struct LogState {
    /// bytes of each node not yet forming a frame
    pending: Vec<Vec<u8>>,
    frames: Vec<(usize, Frame)>,
}
impl BusLog {
    fn record(&self, node: usize, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let LogState {pending, frames} = &mut *inner;
        if pending.len() <= node {
            pending.resize(node + 1, Vec::new());
        }
        let stream = &mut pending[node];
        stream.extend_from_slice(bytes);
        loop {
            match Frame::parse(stream) {
                Ok((frame, size)) => {
                    frames.push((node, frame));
                    stream.drain(.. size);
                },
                Err(FrameError::Truncated) => break,
                Err(_) => {stream.remove(0);},
            }
        }
    }
    /// frames of every node, tagged with the node that wrote them
    pub fn sequence(&self) -> Vec<(usize, Frame)> {
        self.inner.lock().unwrap().frames.clone()
    }
    /// frames written by a node, in order
    pub fn frames(&self, node: usize) -> Vec<Frame> {
        self.sequence().into_iter()
            .filter(|(writer, _)| *writer == node)
            .map(|(_, frame)| frame)
            .collect()
    }
}

/**
    multi-drop bus between `nodes` ports: what a node writes is received by all others

    node 0 is meant for the master
*/
pub fn bus(nodes: usize) -> (Vec<DuplexStream>, BusLog) {
    let log = BusLog::default();
    let mut ports = Vec::new();
    let mut readers = Vec::new();
    let mut writers = Vec::new();
    for _ in 0 .. nodes {
        let (port, hub) = duplex(0x10000);
        let (reader, writer) = split(hub);
        ports.push(port);
        readers.push(reader);
        writers.push(writer);
    }
    let writers: Arc<tokio::sync::Mutex<Vec<WriteHalf<DuplexStream>>>> = Arc::new(tokio::sync::Mutex::new(writers));
    for (node, mut reader) in readers.into_iter().enumerate() {
        let writers = writers.clone();
        let log = log.clone();
        tokio::spawn(async move {
            let mut buffer = [0; 2048];
            loop {
                let size = match reader.read(&mut buffer).await {
                    Ok(0) | Err(_) => break,
                    Ok(size) => size,
                };
                log.record(node, &buffer[.. size]);
                let mut writers = writers.lock().await;
                for (other, writer) in writers.iter_mut().enumerate() {
                    if other != node {
                        // a node may have left the bus
                        let _ = writer.write_all(&buffer[.. size]).await;
                    }
                }
            }
        });
    }
    (ports, log)
}


/// observable state of a simulated board
#[derive(Default, Debug)]
pub struct BoardState {
    pub leds: Vec<LedStatus>,
    pub restarts: usize,
    pub resets: usize,
    pub flashing: bool,
    pub image: Vec<u8>,
    pub finalized: bool,
    /// refuse firmware chunks
    pub broken_flash: bool,
    pub registers: HashMap<u32, u32>,
}

/// board support simulated in memory, clones share the same state
#[derive(Clone)]
pub struct MockBoard {
    pub identity: Identity,
    pub millivolts: u16,
    pub state: Arc<Mutex<BoardState>>,
}
impl MockBoard {
    pub fn new(board_type: BoardType, serial_number: u32, address: u16) -> Self {
        Self {
            identity: Identity {
                board_type,
                serial_number,
                hardware_version: [1, 2, 0, 0],
                timestamp: 1_700_000_000,
            },
            millivolts: address << 2,
            state: Arc::default(),
        }
    }
    pub fn state(&self) -> std::sync::MutexGuard<'_, BoardState> {
        self.state.lock().unwrap()
    }
}
impl Indicator for MockBoard {
    fn show(&mut self, status: LedStatus) {
        self.state().leds.push(status);
    }
}
impl Board for MockBoard {
    fn identity(&self) -> Identity {self.identity}
    fn software_version(&self) -> &str {"1.4.2"}
    fn address_millivolts(&mut self) -> u16 {self.millivolts}
    fn restart(&mut self) {self.state().restarts += 1}
    fn reset(&mut self) {self.state().resets += 1}
    fn read_register(&mut self, address: u32) -> u32 {
        self.state().registers.get(&address).copied().unwrap_or(0)
    }
}
impl Flash for MockBoard {
    fn begin(&mut self) -> Result<(), FlashError> {
        let mut state = self.state();
        state.flashing = true;
        state.image.clear();
        Ok(())
    }
    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError> {
        let mut state = self.state();
        if !state.flashing
            {return Err(FlashError::NotStarted)}
        if state.broken_flash
            {return Err(FlashError::Storage)}
        state.image.extend_from_slice(chunk);
        Ok(())
    }
    fn check(&mut self, size: u32) -> Result<[u8; 16], FlashError> {
        let state = self.state();
        state.image.get(.. size as usize)
            .map(digest)
            .ok_or(FlashError::Invalid)
    }
    fn end(&mut self) -> Result<(), FlashError> {
        let mut state = self.state();
        if !state.flashing
            {return Err(FlashError::NotStarted)}
        state.flashing = false;
        state.finalized = true;
        Ok(())
    }
}

/// stand-in for the md5 digest computed by real boards
pub fn digest(image: &[u8]) -> [u8; 16] {
    let mut digest = [0; 16];
    for (i, byte) in image.iter().enumerate() {
        digest[i % 16] ^= byte.rotate_left(i as u32 % 8);
    }
    digest
}

/// request handler living as long as the test
pub fn handler(handler: impl Fn(&mut RequestPayload) + 'static) -> &'static dyn RequestHandler {
    Box::leak(Box::new(handler))
}


pub type TestMaster = Master<DuplexStream, LoopbackEndpoint>;
pub type TestSlave = Slave<'static, Port<DuplexStream>, LoopbackEndpoint, MockBoard>;

/// a master and its slaves sharing both buses
pub struct Rail {
    pub master: TestMaster,
    pub slaves: Vec<TestSlave>,
    pub boards: Vec<MockBoard>,
    pub log: BusLog,
    pub broadcast: Loopback,
}
impl Rail {
    /// slaves of the given types, serial numbers and addresses, the master has bus node 0
    pub fn new(slaves: &[(BoardType, u32, u16)]) -> Self {
        Self::with_config(slaves, Config::default())
    }
    pub fn with_config(slaves: &[(BoardType, u32, u16)], config: Config) -> Self {
        init_logs();
        let (mut ports, log) = bus(1 + slaves.len());
        let broadcast = Loopback::new(64);
        let boards = slaves.iter()
            .map(|&(board_type, serial, address)| MockBoard::new(board_type, serial, address))
            .collect::<Vec<_>>();
        let slave_ports = ports.split_off(1);
        let slaves = slave_ports.into_iter().zip(&boards)
            .map(|(port, board)| Slave::new(Port(port), broadcast.endpoint(), board.clone()))
            .collect();
        let master = Master::new(ports.remove(0), broadcast.endpoint(), config);
        Self {master, slaves, boards, log, broadcast}
    }

    /// run `test` while the master and every slave serve the buses
    pub async fn serve<T>(&self, test: impl Future<Output = T>) -> T {
        let slaves = self.slaves.iter()
            .map(|slave| Box::pin(slave.run()) as Pin<Box<dyn Future<Output = ()> + '_>>)
            .collect::<Vec<_>>();
        let result = (
            async {
                Some(tokio::time::timeout(Duration::from_secs(60), test)
                    .await.expect("aborted test because took too long"))
            },
            async {
                self.master.run().await.expect("master communication failed");
                None
            },
            async {
                forever(slaves).await;
                None
            },
        ).race().await;
        result.expect("bus simulation stopped")
    }
}

/// poll all futures until one completes
pub async fn forever(mut futures: Vec<Pin<Box<dyn Future<Output = ()> + '_>>>) {
    poll_fn(|cx| {
        for future in futures.iter_mut() {
            if future.as_mut().poll(cx).is_ready()
                {return Poll::Ready(())}
        }
        Poll::Pending
    }).await
}
