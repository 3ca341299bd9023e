mod common;

use std::{
    pin::Pin,
    time::Duration,
    };
use futures_concurrency::future::Race;
use packbytes::{FromBytes, ToBytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use railbus::{
    command::{Command, request},
    frame::*,
    broadcast::{Broadcast, Loopback, BroadcastFrame},
    identity::{BoardType, Signature, BoardInfo},
    indicator::{LedStatus, Color},
    slave::{Slave, provisional_address},
    state::RunState,
    };
use common::{Port, MockBoard, TestSlave, bus, forever, handler, init_logs};


/// raw access to the point-to-point bus, as a master would have
struct Wire {
    port: DuplexStream,
}
impl Wire {
    async fn send(&mut self, frame: &Frame) {
        self.port.write_all(&frame.encode().unwrap()).await.unwrap();
        self.port.write_all(&frame.payload).await.unwrap();
    }
    /// next frame, or `None` if nothing comes within a while
    async fn receive(&mut self) -> Option<Frame> {
        let receiving = async {
            let mut header = [0; HEADER];
            self.port.read_exact(&mut header).await.unwrap();
            let header = Header::parse(header).unwrap();
            let mut payload = vec![0; usize::from(header.length)];
            self.port.read_exact(&mut payload).await.unwrap();
            Frame::decode(&header, &payload).unwrap()
        };
        tokio::time::timeout(Duration::from_millis(50), receiving).await.ok()
    }
    async fn exchange(&mut self, frame: &Frame) -> Option<Frame> {
        self.send(frame).await;
        self.receive().await
    }
}

/// run `test` while the slaves serve the bus
async fn simulate<T>(slaves: &[TestSlave], test: impl Future<Output = T>) -> T {
    let runs = slaves.iter()
        .map(|slave| Box::pin(slave.run()) as Pin<Box<dyn Future<Output = ()> + '_>>)
        .collect();
    let result = (
        async {Some(test.await)},
        async {
            forever(runs).await;
            None
        },
    ).race().await;
    result.expect("slaves stopped")
}

fn setup(boards: &[MockBoard]) -> (Wire, Vec<TestSlave>, Loopback) {
    init_logs();
    let (mut ports, _log) = bus(1 + boards.len());
    let broadcast = Loopback::new(16);
    let slaves = ports.split_off(1).into_iter().zip(boards)
        .map(|(port, board)| Slave::new(Port(port), broadcast.endpoint(), board.clone()))
        .collect();
    (Wire {port: ports.remove(0)}, slaves, broadcast)
}


#[test]
fn address_from_voltage() {
    assert_eq!(provisional_address(0), None);
    assert_eq!(provisional_address(3), None);
    assert_eq!(provisional_address(4), Some(1));
    assert_eq!(provisional_address(1234), Some(308));
    assert_eq!(provisional_address(0x1FFF), Some(0x7FF));
    assert_eq!(provisional_address(0x2000), None);
}

#[tokio::test(start_paused = true)]
async fn answers_only_targeted_acknowledged_requests() {
    let boards = [
        MockBoard::new(BoardType::DISCRETE, 1, 10),
        MockBoard::new(BoardType::DISCRETE, 2, 11),
        ];
    let (mut wire, mut slaves, _broadcast) = setup(&boards);
    for slave in &mut slaves {
        slave.on_request(request::DIGITAL_READ, handler(|payload| payload.push(0x42).unwrap())).ok().unwrap();
    }
    simulate(&slaves, async {
        let reply = wire.exchange(&Frame::request(11, request::DIGITAL_READ, &[1], true).unwrap()).await.unwrap();
        assert_eq!(reply.direction, Direction::Response);
        assert_eq!(reply.address, 11);
        assert_eq!(reply.opcode(), Some((request::DIGITAL_READ, &[1, 0x42][..])));

        // no acknowledgement requested
        assert_eq!(wire.exchange(&Frame::request(11, request::DIGITAL_READ, &[1], false).unwrap()).await, None);
        // broadcast requests would collide
        assert_eq!(wire.exchange(&Frame::request(BROADCAST, request::DIGITAL_READ, &[1], true).unwrap()).await, None);
        // nobody there
        assert_eq!(wire.exchange(&Frame::request(12, request::DIGITAL_READ, &[1], true).unwrap()).await, None);
        // responses are not requests
        let mut stray = Frame::request(10, request::DIGITAL_READ, &[1], true).unwrap();
        stray.direction = Direction::Response;
        assert_eq!(wire.exchange(&stray).await, None);

        // corrupted frames are dropped and the slave keeps serving
        let mut bytes = Vec::from(Frame::new(Command::LedStatus, 10).encode().unwrap());
        bytes[HEADER - 1] ^= 0xFF;
        wire.port.write_all(&bytes).await.unwrap();
        let reply = wire.exchange(&Frame::new(Command::Nop, 10).with_ack(true)).await.unwrap();
        assert_eq!(reply.command, Command::Nop);
        assert_eq!(reply.address, 10);
    }).await;
    assert!(slaves.iter().all(|slave| slave.state() == RunState::Running));
}

#[tokio::test(start_paused = true)]
async fn ping() {
    let boards = [
        MockBoard::new(BoardType::STEPPER, 1, 10),
        MockBoard::new(BoardType::STEPPER, 2, 11),
        ];
    let (mut wire, slaves, _broadcast) = setup(&boards);
    simulate(&slaves, async {
        let signature = Signature {board_type: BoardType::STEPPER, serial_number: 2};
        let ping = Frame::new(Command::Ping, BROADCAST)
            .with_ack(true)
            .with_payload(&signature.to_le_bytes()).unwrap();
        let reply = wire.exchange(&ping).await.unwrap();
        assert_eq!(reply.address, 11);
        assert_eq!(reply.payload, ping.payload);

        let signature = Signature {board_type: BoardType::DISCRETE, serial_number: 2};
        let ping = Frame::new(Command::Ping, BROADCAST)
            .with_ack(true)
            .with_payload(&signature.to_le_bytes()).unwrap();
        assert_eq!(wire.exchange(&ping).await, None);
    }).await;
}

#[tokio::test(start_paused = true)]
async fn unaddressed() {
    let mut board = MockBoard::new(BoardType::MIXED, 1, 0);
    board.millivolts = 2;
    let (mut wire, slaves, broadcast) = setup(&[board]);
    let mut listener = broadcast.endpoint();
    assert_eq!(slaves[0].address(), None);
    simulate(&slaves, async {
        let signature = Signature {board_type: BoardType::MIXED, serial_number: 1};
        let ping = Frame::new(Command::Ping, BROADCAST)
            .with_ack(true)
            .with_payload(&signature.to_le_bytes()).unwrap();
        assert_eq!(wire.exchange(&ping).await, None);
        assert!(slaves[0].send_event(0, &[]).await.is_err());

        slaves[0].set_address(Some(33));
        assert_eq!(wire.exchange(&ping).await.unwrap().address, 33);

        // discovery answers come on the broadcast bus
        wire.send(&Frame::new(Command::Discover, BROADCAST)).await;
        let (sender, frame) = listener.read().await.unwrap();
        assert_eq!(sender, 33);
        assert_eq!(frame, BroadcastFrame::new(Command::Discover, &signature.to_le_bytes()).unwrap());
    }).await;
}

#[tokio::test(start_paused = true)]
async fn system_commands() {
    let board = MockBoard::new(BoardType::ANALOG_LS, 9, 20);
    board.state().registers.insert(8, 80);
    let (mut wire, slaves, _broadcast) = setup(&[board.clone()]);
    simulate(&slaves, async {
        let reply = wire.exchange(&Frame::new(Command::BoardInfo, 20).with_ack(true)).await.unwrap();
        let info = BoardInfo::from_le_bytes(reply.payload[..].try_into().unwrap());
        assert_eq!(info.identity, board.identity);
        assert_eq!(info.software_version.as_str().unwrap(), "1.4.2");

        let reply = wire.exchange(&Frame::new(Command::ReadRegister, 20)
            .with_ack(true)
            .with_payload(&8u32.to_le_bytes()).unwrap()
            ).await.unwrap();
        assert_eq!(reply.payload[..], 80u32.to_le_bytes());

        let led = Frame::new(Command::LedStatus, 20)
            .with_payload(&LedStatus::Blink(Color::Purple, 500).to_bytes()).unwrap();
        assert_eq!(wire.exchange(&led).await, None);
        // a malformed status is refused
        let led = Frame::new(Command::LedStatus, 20).with_ack(true).with_payload(&[9]).unwrap();
        assert!(wire.exchange(&led).await.unwrap().error);

        // restart is acknowledged before rebooting
        let reply = wire.exchange(&Frame::new(Command::Restart, 20).with_ack(true)).await.unwrap();
        assert_eq!(reply.command, Command::Restart);
        wire.send(&Frame::new(Command::Reset, BROADCAST)).await;
        wire.send(&Frame::new(Command::Heartbeat, BROADCAST)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }).await;

    let state = board.state();
    assert_eq!(state.leds, [LedStatus::Blink(Color::Purple, 500)]);
    assert_eq!(state.restarts, 1);
    assert_eq!(state.resets, 1);
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume() {
    let board = MockBoard::new(BoardType::DISCRETE, 1, 10);
    let (mut wire, slaves, _broadcast) = setup(&[board]);
    slaves[0].stop();
    assert_eq!(slaves[0].state(), RunState::Idle);
    simulate(&slaves, async {
        let nop = Frame::new(Command::Nop, 10).with_ack(true);
        assert_eq!(wire.exchange(&nop).await, None);
        slaves[0].start();
        // the pending frame is served on resume
        assert_eq!(wire.receive().await.unwrap().command, Command::Nop);
        assert_eq!(wire.exchange(&nop).await.unwrap().command, Command::Nop);
    }).await;
}

#[tokio::test(start_paused = true)]
async fn stop_while_waiting() {
    let board = MockBoard::new(BoardType::DISCRETE, 1, 10);
    let (mut wire, slaves, _broadcast) = setup(&[board]);
    simulate(&slaves, async {
        let nop = Frame::new(Command::Nop, 10).with_ack(true);
        assert_eq!(wire.exchange(&nop).await.unwrap().command, Command::Nop);
        // the slave is already waiting for a frame, it serves that one before pausing
        slaves[0].stop();
        assert_eq!(wire.exchange(&nop).await.unwrap().command, Command::Nop);
        assert_eq!(wire.exchange(&nop).await, None);
        assert_eq!(slaves[0].state(), RunState::Idle);
    }).await;
}
