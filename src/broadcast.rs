/*!
    broadcast bus: fixed size frames without acknowledgement, tagged with their sender's address by the transport

    it carries what is safe to lose: discovery announcements and events raised by slaves
*/

use core::fmt::Debug;

use crate::command::Command;


/// number of argument bytes after the command
pub const ARGS: usize = 7;

/// broadcast frame: a command and up to [ARGS] argument bytes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BroadcastFrame {
    pub command: Command,
    args: [u8; ARGS],
    /// number of meaningful bytes, command included
    length: u8,
}
impl BroadcastFrame {
    /// frame with the given arguments, `None` if they do not fit
    pub fn new(command: Command, args: &[u8]) -> Option<Self> {
        if args.len() > ARGS
            {return None}
        let mut frame = Self {command, args: [0; ARGS], length: 1 + args.len() as u8};
        frame.args[.. args.len()].copy_from_slice(args);
        Some(frame)
    }
    pub fn args(&self) -> &[u8] {
        &self.args[.. usize::from(self.length - 1)]
    }
    /// number of meaningful bytes on the wire, command included
    pub fn len(&self) -> usize {
        usize::from(self.length)
    }
    /// raw frame, padded with zeros
    pub fn to_bytes(&self) -> [u8; 1 + ARGS] {
        let mut bytes = [0; 1 + ARGS];
        bytes[0] = u8::from(self.command);
        bytes[1 ..].copy_from_slice(&self.args);
        bytes
    }
    /// decode the meaningful bytes of a received frame
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&command, args) = bytes.split_first()?;
        Self::new(Command::from(command), args)
    }
}

/**
    broadcast transport, implemented by the board support of each node

    reading and writing are best effort: errors are reported but nothing is ever retried here
*/
#[allow(async_fn_in_trait)]
pub trait Broadcast {
    type Error: Debug;
    /// send a frame on behalf of the given logical address
    async fn write(&mut self, sender: u16, frame: &BroadcastFrame) -> Result<(), Self::Error>;
    /// wait for the next frame sent by another node, returning its sender address
    async fn read(&mut self) -> Result<(u16, BroadcastFrame), Self::Error>;
}


#[cfg(feature = "master")]
pub use loopback::*;

#[cfg(feature = "master")]
mod loopback {
    use core::sync::atomic::{AtomicUsize, Ordering::*};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    use super::*;

    /// frame as it travels in the loopback, with the endpoint that emitted it
    type Packet = (usize, u16, [u8; 1 + ARGS], u8);

    /**
        in-memory broadcast bus, for host simulations and tests

        every frame written by an endpoint is received by all the other endpoints
    */
    #[derive(Clone)]
    pub struct Loopback {
        sender: broadcast::Sender<Packet>,
        endpoints: Arc<AtomicUsize>,
    }
    impl Loopback {
        /// `capacity` is the number of frames an endpoint can lag behind before losing some
        pub fn new(capacity: usize) -> Self {
            Self {
                sender: broadcast::channel(capacity).0,
                endpoints: Arc::new(AtomicUsize::new(0)),
            }
        }
        /// connect a new node to this bus
        pub fn endpoint(&self) -> LoopbackEndpoint {
            LoopbackEndpoint {
                id: self.endpoints.fetch_add(1, Relaxed),
                sender: self.sender.clone(),
                receiver: self.sender.subscribe(),
            }
        }
    }

    pub struct LoopbackEndpoint {
        id: usize,
        sender: broadcast::Sender<Packet>,
        receiver: broadcast::Receiver<Packet>,
    }
    impl Broadcast for LoopbackEndpoint {
        type Error = broadcast::error::RecvError;

        async fn write(&mut self, sender: u16, frame: &BroadcastFrame) -> Result<(), Self::Error> {
            // nobody listening is not an error on a broadcast bus
            let _ = self.sender.send((self.id, sender, frame.to_bytes(), frame.length));
            Ok(())
        }
        async fn read(&mut self) -> Result<(u16, BroadcastFrame), Self::Error> {
            loop {
                let (id, sender, bytes, length) = self.receiver.recv().await?;
                if id == self.id
                    {continue}
                if let Some(frame) = BroadcastFrame::from_bytes(&bytes[.. usize::from(length)])
                    {return Ok((sender, frame))}
            }
        }
    }
}
