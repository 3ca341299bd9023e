/*!
    asynchronous bus master in `std` environment, on top of tokio

    The central resource is the [Master] struct, which owns both buses. It must be running [Master::run] to receive discovery answers, events and errors from slaves.

    - [Module] is the application's proxy to one expected slave, it is bound to a logical address by [Master::auto_id]
    - methods at [Master] level address slaves by logical address
    - [Master::relay_firmware] lets a host flashing tool reflash a slave through the master
*/

/// implementation of the bus exchanges, this is the tricky part of the code
mod networking;
/// convenient methods to send requests and system commands
mod accessing;
/// binding of module proxies to slaves on the bus
mod mapping;
/// host side packet framing of firmware updates
pub mod slip;
/// firmware update of slaves through the master
pub mod relay;


pub use networking::Master;
pub use accessing::*;
pub use mapping::*;
pub use relay::{HostPort, RelayState};


use std::{
    boxed::Box,
    time::Duration,
    };
use thiserror::Error;

use crate::{
    command::Command,
    frame::FrameError,
    identity::BoardType,
    };

/// error regarding bus communication
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem with serial bus")]
    Bus(#[from] std::io::Error),
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),
    #[error("no answer arrived in expected time")]
    Timeout,
    #[error("slave could not serve {command:?}")]
    Rejected {command: Command},
    #[error("problem detected on master side: {0}")]
    Master(&'static str),
    #[error("module is not bound to any slave yet")]
    Unaddressed,
    #[error("modules with serial number ({with_serial}) and without ({without_serial}) cannot be addressed together")]
    MixedAddressing {with_serial: usize, without_serial: usize},
    #[error("{declared} modules declared but {discovered} slaves discovered")]
    CountMismatch {declared: usize, discovered: usize},
    #[error("type of module {index} is incorrect: declared {declared} detected {detected}")]
    TypeMismatch {index: usize, declared: BoardType, detected: BoardType},
    #[error("module {index} ({board_type} serial {serial}) did not answer")]
    UnresolvedSerial {index: usize, board_type: BoardType, serial: u32},
    #[error("firmware host link: {0}")]
    Host(#[from] slip::SlipError),
    #[error("firmware relay aborted during {step:?}")]
    RelayAbort {step: RelayState, source: Box<Error>},
}

/// timings of bus operations, to be tuned with bus length and number of slaves
#[derive(Clone, Debug)]
pub struct Config {
    /// answer of a generic request
    pub request_timeout: Duration,
    /// answer of a ping
    pub ping_timeout: Duration,
    /// answer of board info and other system commands
    pub info_timeout: Duration,
    /// time left to every slave to answer a discovery
    pub settle: Duration,
    /// pause between commands sent to successive slaves during addressing
    pub pacing: Duration,
    /// preparation of a slave's flash before an update
    pub relay_begin: Duration,
    /// write of one firmware chunk
    pub relay_write: Duration,
    /// digest of the written firmware
    pub relay_check: Duration,
    /// register read tunneled by the relay
    pub relay_register: Duration,
    /// baud rate of the link to the host flashing tool
    pub host_baud_rate: u32,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(100),
            ping_timeout: Duration::from_millis(100),
            info_timeout: Duration::from_millis(100),
            settle: Duration::from_millis(200),
            pacing: Duration::from_millis(50),
            relay_begin: Duration::from_secs(5),
            relay_write: Duration::from_millis(100),
            relay_check: Duration::from_secs(3),
            relay_register: Duration::from_millis(200),
            host_baud_rate: 115_200,
        }
    }
}

