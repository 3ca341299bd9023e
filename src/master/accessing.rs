use core::sync::atomic::{AtomicU16, AtomicU32, Ordering::*};
use tokio::io::{AsyncRead, AsyncWrite};
use packbytes::{FromBytes, ToBytes, ByteArray};
use std::{
    sync::Arc,
    vec::Vec,
    time::Duration,
    };

use crate::{
    command::{Command, ErrorCode},
    frame::*,
    broadcast::Broadcast,
    identity::{BoardType, Signature, BoardInfo},
    indicator::{LedStatus, Color},
    utils::array,
    };
use super::{
    Error,
    networking::Master,
    };


/// callback of an event raised by a slave, it receives the event arguments
pub trait EventHandler: Send + Sync {
    fn handle(&self, args: &[u8]);
}
impl<F: Fn(&[u8]) + Send + Sync> EventHandler for F {
    fn handle(&self, args: &[u8]) {self(args)}
}
/// callback of errors reported by any slave, it receives the slave address and the error
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, address: u16, code: ErrorCode);
}
impl<F: Fn(u16, ErrorCode) + Send + Sync> ErrorHandler for F {
    fn handle(&self, address: u16, code: ErrorCode) {self(address, code)}
}

/// state of a module proxy shared with the master registry
pub(crate) struct Binding {
    pub board_type: BoardType,
    pub serial: AtomicU32,
    pub address: AtomicU16,
}
impl Binding {
    pub fn address(&self) -> Option<u16> {
        match self.address.load(Relaxed) {
            UNASSIGNED => None,
            address => Some(address),
        }
    }
}


impl<P: AsyncRead + AsyncWrite + Unpin, B: Broadcast> Master<P, B> {
    /**
        declare a slave expected on the bus

        modules are bound to slaves by [Self::auto_id], in the order they are declared here. A null `serial` means the module is found by its position on the rail, otherwise by its serial number. Dropping the module removes it from the registry.
    */
    pub fn module(&self, board_type: BoardType, serial: u32) -> Module<'_, P, B> {
        let binding = Arc::new(Binding {
            board_type,
            serial: AtomicU32::new(serial),
            address: AtomicU16::new(UNASSIGNED),
        });
        let mut modules = self.modules.blocking_lock();
        modules.retain(|module| module.strong_count() != 0);
        modules.push(Arc::downgrade(&binding));
        Module {master: self, binding}
    }
    /// live modules, in declaration order
    pub(crate) fn bindings(&self) -> Vec<Arc<Binding>> {
        self.modules.blocking_lock().iter()
            .filter_map(|module| module.upgrade())
            .collect()
    }

    /**
        generic request to the slave at `address`

        `payload` is sent after `opcode` and replaced by the response payload, without its opcode. Without `ack`, the request is only sent and `payload` left untouched.
    */
    pub async fn request(&self, address: u16, opcode: u8, payload: &mut Vec<u8>, ack: bool) -> Result<(), Error> {
        let mut frame = Frame::request(address, opcode, payload, ack)?;
        self.exchange(&mut frame, self.config.request_timeout).await?;
        if ack {
            let (answered, data) = frame.opcode()
                .ok_or(Error::Master("response lacks request opcode"))?;
            if answered != opcode
                {return Err(Error::Master("response opcode mismatch"))}
            payload.clear();
            payload.extend_from_slice(data);
        }
        Ok(())
    }
    /// address of the slave with the given signature
    pub async fn ping(&self, board_type: BoardType, serial_number: u32) -> Result<u16, Error> {
        let signature = Signature {board_type, serial_number};
        let mut frame = Frame::new(Command::Ping, BROADCAST)
            .with_ack(true)
            .with_payload(&signature.to_le_bytes())?;
        self.exchange(&mut frame, self.config.ping_timeout).await?;
        match frame.address {
            BROADCAST => Err(Error::Master("ping answered from broadcast address")),
            address => Ok(address),
        }
    }
    pub async fn board_info(&self, address: u16) -> Result<BoardInfo, Error> {
        let mut frame = Frame::new(Command::BoardInfo, address).with_ack(true);
        self.exchange(&mut frame, self.config.info_timeout).await?;
        Ok(BoardInfo::from_le_bytes(
            array(&frame.payload).ok_or(Error::Master("board info has wrong size"))?
            ))
    }
    pub async fn read_register(&self, address: u16, register: u32) -> Result<u32, Error> {
        self.read_register_within(address, register, self.config.info_timeout).await
    }
    pub(crate) async fn read_register_within(&self, address: u16, register: u32, timeout: Duration) -> Result<u32, Error> {
        let mut frame = Frame::new(Command::ReadRegister, address)
            .with_ack(true)
            .with_payload(&register.to_le_bytes())?;
        self.exchange(&mut frame, timeout).await?;
        Ok(u32::from_le_bytes(
            array(&frame.payload).ok_or(Error::Master("register value has wrong size"))?
            ))
    }
    /// reboot the slave at `address`
    pub async fn restart(&self, address: u16) -> Result<(), Error> {
        self.exchange(&mut Frame::new(Command::Restart, address), self.config.info_timeout).await
    }
    /// ask every slave to run its reset hooks
    pub async fn reset_modules(&self) -> Result<(), Error> {
        self.exchange(&mut Frame::new(Command::Reset, BROADCAST), self.config.info_timeout).await
    }
    /// set the status LED of the slave at `address`, or of all slaves with [BROADCAST]
    pub async fn set_led(&self, address: u16, status: LedStatus) -> Result<(), Error> {
        let mut frame = Frame::new(Command::LedStatus, address)
            .with_payload(&status.to_bytes())?;
        self.exchange(&mut frame, self.config.info_timeout).await
    }

    /// call `handler` each time the slave at `address` raises `event`, replacing any previous handler
    pub fn on_event(&self, event: u8, address: u16, handler: impl EventHandler + 'static) {
        self.events.blocking_lock().insert((event, address), Arc::new(handler));
    }
    pub fn remove_event(&self, event: u8, address: u16) {
        self.events.blocking_lock().remove(&(event, address));
    }
    /// call `handler` each time any slave reports an error
    pub fn on_error(&self, handler: impl ErrorHandler + 'static) {
        self.errors.blocking_lock().replace(Arc::new(handler));
    }
}


/**
    proxy to one slave expected on the bus, the target of peripheral drivers' requests

    it is a lightweight reference to [Master], unusable until [Master::auto_id] binds it
*/
pub struct Module<'m, P, B> {
    master: &'m Master<P, B>,
    binding: Arc<Binding>,
}
impl<'m, P: AsyncRead + AsyncWrite + Unpin, B: Broadcast> Module<'m, P, B> {
    pub fn master(&self) -> &'m Master<P, B> {self.master}
    pub fn board_type(&self) -> BoardType {self.binding.board_type}
    /// serial number, declared or learned during addressing, 0 if unknown
    pub fn serial_number(&self) -> u32 {self.binding.serial.load(Relaxed)}
    /// logical address of the bound slave
    pub fn address(&self) -> Option<u16> {self.binding.address()}
    fn bound(&self) -> Result<u16, Error> {
        self.address().ok_or(Error::Unaddressed)
    }

    /// generic request, see [Master::request]
    pub async fn request(&self, opcode: u8, payload: &mut Vec<u8>, ack: bool) -> Result<(), Error> {
        self.master.request(self.bound()?, opcode, payload, ack).await
    }
    /// generic request with fixed size arguments and answer
    pub async fn call<A: ToBytes, R: FromBytes>(&self, opcode: u8, args: A) -> Result<R, Error> {
        let mut payload = args.to_le_bytes().as_ref().to_vec();
        self.request(opcode, &mut payload, true).await?;
        let mut answer = R::Bytes::zeroed();
        if payload.len() != R::Bytes::SIZE
            {return Err(Error::Master("answer has unexpected size"))}
        answer.as_mut().copy_from_slice(&payload);
        Ok(R::from_le_bytes(answer))
    }
    /// generic request with fixed size arguments, not waiting for any answer
    pub async fn send<A: ToBytes>(&self, opcode: u8, args: A) -> Result<(), Error> {
        let mut payload = args.to_le_bytes().as_ref().to_vec();
        self.request(opcode, &mut payload, false).await
    }

    pub async fn board_info(&self) -> Result<BoardInfo, Error> {
        self.master.board_info(self.bound()?).await
    }
    pub async fn restart(&self) -> Result<(), Error> {
        self.master.restart(self.bound()?).await
    }
    pub async fn led(&self, status: LedStatus) -> Result<(), Error> {
        self.master.set_led(self.bound()?, status).await
    }
    pub async fn led_on(&self, color: Color) -> Result<(), Error> {
        self.led(LedStatus::On(color)).await
    }
    pub async fn led_off(&self) -> Result<(), Error> {
        self.led(LedStatus::Off).await
    }
    /// blink with the given period in milliseconds
    pub async fn led_blink(&self, color: Color, period: u32) -> Result<(), Error> {
        self.led(LedStatus::Blink(color, period)).await
    }
    /// call `handler` each time this module raises `event`
    pub fn on_event(&self, event: u8, handler: impl EventHandler + 'static) -> Result<(), Error> {
        self.master.on_event(event, self.bound()?, handler);
        Ok(())
    }
    pub fn remove_event(&self, event: u8) -> Result<(), Error> {
        self.master.remove_event(event, self.bound()?);
        Ok(())
    }
}
