/*!
    protocol stack of a modular I/O rail: one master board and many slave boards sharing

    - a multi-drop serial bus carrying addressed, optionally acknowledged [frame]s
    - a broadcast bus carrying short unacknowledged [broadcast] frames keyed by their sender

    The `slave` feature brings the `no_std` firmware side, the `master` feature the tokio host side.
*/
#![no_std]
#[cfg(any(feature = "std", test))]
extern crate std;

mod mutex;
mod utils;

pub mod command;
pub mod frame;
pub mod broadcast;
pub mod identity;
pub mod indicator;
pub mod state;
#[cfg(feature = "master")]
pub mod master;
#[cfg(feature = "slave")]
pub mod slave;
