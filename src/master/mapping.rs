use core::sync::atomic::Ordering::*;
use tokio::io::{AsyncRead, AsyncWrite};
use log::*;
use std::{
    sync::Arc,
    vec::Vec,
    };

use crate::{
    command::Command,
    frame::{Frame, BROADCAST},
    broadcast::Broadcast,
    identity::BoardType,
    indicator::{LedStatus, Color, Fault},
    };
use super::{
    Error,
    networking::Master,
    accessing::Binding,
    };


/// slave that answered a discovery
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Discovered {
    pub address: u16,
    pub board_type: BoardType,
    pub serial_number: u32,
}

impl<P: AsyncRead + AsyncWrite + Unpin, B: Broadcast> Master<P, B> {
    /**
        bind every declared [Module](super::Module) to a slave on the bus

        - modules declared without serial number are bound by position: the slaves answering a discovery are taken by decreasing address and matched with the modules in declaration order
        - modules declared with a serial number are bound to the slave answering a ping with their signature

        both kinds cannot be mixed in one run. Any failure to find the declared modules aborts the run before binding anything, and shows on the master indicator. Failing to light the LEDs of bound modules is only logged. [Self::run] must be running for position based addressing.
    */
    pub async fn auto_id(&self) -> Result<(), Error> {
        let result = self.bind_modules().await;
        if let Err(err) = &result {
            error!("auto addressing failed: {}", err);
            self.show(Fault::Addressing.led());
        }
        result
    }

    async fn bind_modules(&self) -> Result<(), Error> {
        let modules = self.bindings();
        let with_serial = modules.iter()
            .filter(|module| module.serial.load(Relaxed) != 0)
            .count();
        let without_serial = modules.len() - with_serial;
        if with_serial != 0 && without_serial != 0
            {return Err(Error::MixedAddressing {with_serial, without_serial})}
        if modules.is_empty() {
            info!("no module to address");
            return Ok(());
        }

        let addresses = if without_serial != 0
            {self.bind_by_position(&modules).await?}
        else
            {self.bind_by_serial(&modules).await?};

        for (module, &address) in modules.iter().zip(&addresses) {
            module.address.store(address, Relaxed);
        }
        // the LEDs only show progress, the binding stands if they fail
        for &address in &addresses {
            self.progress(address, LedStatus::On(Color::Yellow)).await;
            tokio::time::sleep(self.config.pacing).await;
        }
        for &address in &addresses {
            self.progress(address, LedStatus::Blink(Color::Green, 1000)).await;
        }
        self.show(LedStatus::Blink(Color::Green, 1000));
        info!("{} modules addressed", modules.len());
        Ok(())
    }
    async fn progress(&self, address: u16, status: LedStatus) {
        if let Err(err) = self.set_led(address, status).await {
            warn!("cannot show addressing progress on {}: {}", address, err);
        }
    }

    async fn bind_by_position(&self, modules: &[Arc<Binding>]) -> Result<Vec<u16>, Error> {
        let discovered = self.discover().await?;
        if discovered.len() != modules.len() {
            error!("{} modules declared, {} slaves discovered", modules.len(), discovered.len());
            return Err(Error::CountMismatch {declared: modules.len(), discovered: discovered.len()});
        }
        for (index, (module, slave)) in modules.iter().zip(&discovered).enumerate() {
            if !module.board_type.is_compatible(slave.board_type) {
                error!("module {} at address {} is {}, expected {}", index, slave.address, slave.board_type, module.board_type);
                return Err(Error::TypeMismatch {
                    index,
                    declared: module.board_type,
                    detected: slave.board_type,
                });
            }
        }
        for (module, slave) in modules.iter().zip(&discovered) {
            module.serial.store(slave.serial_number, Relaxed);
        }
        Ok(discovered.iter().map(|slave| slave.address).collect())
    }

    async fn bind_by_serial(&self, modules: &[Arc<Binding>]) -> Result<Vec<u16>, Error> {
        let mut addresses = Vec::with_capacity(modules.len());
        for (index, module) in modules.iter().enumerate() {
            let serial = module.serial.load(Relaxed);
            match self.ping(module.board_type, serial).await {
                Ok(address) => {
                    debug!("module {} serial {} found at {}", index, serial, address);
                    addresses.push(address);
                },
                Err(Error::Timeout) => return Err(Error::UnresolvedSerial {
                    index,
                    board_type: module.board_type,
                    serial,
                }),
                Err(err) => return Err(err),
            }
        }
        Ok(addresses)
    }

    /**
        ask every slave to announce itself, and collect the answers received during the settling time

        slaves are returned by decreasing address, which is their order along the rail
    */
    pub async fn discover(&self) -> Result<Vec<Discovered>, Error> {
        self.discovered.blocking_lock().clear();
        self.exchange(&mut Frame::new(Command::Discover, BROADCAST), self.config.info_timeout).await?;
        self.show(LedStatus::On(Color::Yellow));
        tokio::time::sleep(self.config.settle).await;
        let discovered = self.discovered.blocking_lock().iter()
            .rev()
            .map(|(&address, signature)| Discovered {
                address,
                board_type: signature.board_type,
                serial_number: signature.serial_number,
            })
            .collect::<Vec<_>>();
        info!("discovered {} slaves", discovered.len());
        Ok(discovered)
    }
}
