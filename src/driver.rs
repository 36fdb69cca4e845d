//! Driver: the set of FPGAs
//!
//! [`Driver`] registers up to five FPGAs, routes requests by FPGA id,
//! collects every device's completions into one [`CompletionQueue`] and
//! owns the per-FPGA worker threads.
//!
//! # Example
//!
//! ```ignore
//! let mut driver = Driver::new(EngineConfig::default())?;
//! driver.add_fpga(descriptor, regs, &allocator)?;
//! driver.start_workers()?;
//!
//! // From the interrupt line of FPGA 0
//! driver.handle_interrupt(0)?;
//!
//! let request = Request::receive(2, buffer).with_timeout(Duration::from_millis(500));
//! let completion = driver.transfer(0, request)?;
//! let bytes = completion.result()?;
//! ```

use std::sync::Arc;

use log::info;

use crate::channel::{ChannelSnapshot, Direction};
use crate::completion::{Completion, CompletionQueue};
use crate::config::{EngineConfig, FpgaDescriptor};
use crate::constants::MAX_FPGAS;
use crate::device::{FpgaDevice, StatsSnapshot};
use crate::dma::DmaAllocator;
use crate::error::{ConfigError, RequestError, Result, TransferError};
use crate::register::{DeviceInfo, RegisterBank};
use crate::request::{Request, Ticket};
use crate::worker::Worker;

/// One entry of [`Driver::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FpgaInfo {
    /// Enumeration facts
    pub descriptor: FpgaDescriptor,
    /// Decoded info word
    pub info: DeviceInfo,
}

/// Engine for every FPGA the driver manages
pub struct Driver {
    config: EngineConfig,
    devices: Vec<Arc<FpgaDevice>>,
    completions: Arc<CompletionQueue>,
    workers: Vec<Worker>,
}

impl Driver {
    /// Create an empty driver
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            devices: Vec::with_capacity(MAX_FPGAS),
            completions: Arc::new(CompletionQueue::new()),
            workers: Vec::new(),
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bring up an FPGA and register it under `descriptor.id`.
    ///
    /// If workers are running, one is started for the new FPGA too.
    pub fn add_fpga(
        &mut self,
        descriptor: FpgaDescriptor,
        regs: Arc<dyn RegisterBank>,
        allocator: &dyn DmaAllocator,
    ) -> Result<Arc<FpgaDevice>> {
        if self.devices.len() >= MAX_FPGAS {
            return Err(ConfigError::TooManyFpgas.into());
        }
        if self.devices.iter().any(|d| d.id() == descriptor.id) {
            return Err(ConfigError::DuplicateFpga.into());
        }

        let device = Arc::new(FpgaDevice::new(
            descriptor,
            regs,
            allocator,
            &self.config,
            self.completions.clone(),
        )?);
        if !self.workers.is_empty() {
            self.spawn_worker(&device)?;
        }
        self.devices.push(Arc::clone(&device));
        Ok(device)
    }

    /// Descriptor and info word of every registered FPGA
    pub fn list(&self) -> Vec<FpgaInfo> {
        self.devices
            .iter()
            .map(|d| FpgaInfo {
                descriptor: d.descriptor().clone(),
                info: d.info(),
            })
            .collect()
    }

    /// Look up a registered FPGA
    pub fn device(&self, fpga_id: u64) -> Result<&Arc<FpgaDevice>> {
        self.devices
            .iter()
            .find(|d| d.id() == fpga_id)
            .ok_or_else(|| RequestError::UnknownFpga.into())
    }

    /// Shared completion queue
    pub fn completions(&self) -> &Arc<CompletionQueue> {
        &self.completions
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Submit without waiting; the completion lands in [`Self::completions`]
    pub fn submit(&self, fpga_id: u64, request: Request) -> Result<Ticket> {
        self.device(fpga_id)?.submit(request)
    }

    /// Submit and block until the request completes.
    ///
    /// The wait is unbounded: a request with a timeout is ended by the
    /// worker, one without waits for the hardware. Requires running
    /// workers (or another thread servicing the device).
    pub fn transfer(&self, fpga_id: u64, request: Request) -> Result<Completion> {
        let ticket = self.submit(fpga_id, request)?;
        self.completions
            .wait(ticket, None)
            .ok_or_else(|| TransferError::TimedOut.into())
    }

    /// Withdraw a request. Returns `false` if it already completed.
    pub fn cancel(&self, ticket: Ticket) -> bool {
        self.device(ticket.fpga_id)
            .is_ok_and(|device| device.cancel(ticket))
    }

    /// Reset every channel of one FPGA
    pub fn reset(&self, fpga_id: u64) -> Result<()> {
        self.device(fpga_id)?.reset();
        Ok(())
    }

    /// State of one channel-direction
    pub fn snapshot(
        &self,
        fpga_id: u64,
        channel: usize,
        direction: Direction,
    ) -> Result<ChannelSnapshot> {
        self.device(fpga_id)?.snapshot(channel, direction)
    }

    /// Counters of one FPGA
    pub fn stats(&self, fpga_id: u64) -> Result<StatsSnapshot> {
        Ok(self.device(fpga_id)?.stats())
    }

    /// Interrupt entry point for one FPGA
    pub fn handle_interrupt(&self, fpga_id: u64) -> Result<()> {
        self.device(fpga_id)?.handle_interrupt();
        Ok(())
    }

    // =========================================================================
    // Workers
    // =========================================================================

    fn spawn_worker(&mut self, device: &Arc<FpgaDevice>) -> Result<()> {
        let name = format!("{}-{}", self.config.worker_name, device.descriptor().name);
        self.workers.push(Worker::spawn(Arc::clone(device), name)?);
        Ok(())
    }

    /// Start a worker thread for every FPGA that has none
    pub fn start_workers(&mut self) -> Result<()> {
        let pending: Vec<Arc<FpgaDevice>> = self
            .devices
            .iter()
            .filter(|d| !self.workers.iter().any(|w| w.fpga_id() == d.id()))
            .cloned()
            .collect();
        for device in &pending {
            self.spawn_worker(device)?;
        }
        info!("{} workers running", self.workers.len());
        Ok(())
    }

    /// Stop and join every worker thread
    pub fn stop_workers(&mut self) {
        for worker in &mut self.workers {
            worker.stop();
        }
        self.workers.clear();
    }

    /// Check if workers are running
    pub fn workers_running(&self) -> bool {
        !self.workers.is_empty()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Status;
    use crate::error::Error;
    use crate::testing::{SimFpga, pattern};
    use core::time::Duration;

    fn descriptor(id: u64, channels: usize) -> FpgaDescriptor {
        FpgaDescriptor::new(id, 0x10EE, 0x7024, &format!("fpga{id}"), channels)
    }

    fn add(driver: &mut Driver, id: u64, channels: usize) -> SimFpga {
        let fpga = SimFpga::new(channels as u32);
        driver
            .add_fpga(descriptor(id, channels), fpga.bank(), &fpga.mem)
            .unwrap();
        fpga
    }

    // =========================================================================
    // Registration
    // =========================================================================

    #[test]
    fn list_reports_registered_fpgas() {
        let mut driver = Driver::new(EngineConfig::default()).unwrap();
        add(&mut driver, 0, 4);
        add(&mut driver, 1, 12);

        let list = driver.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].descriptor.name, "fpga0");
        assert_eq!(list[0].descriptor.num_channels, 4);
        assert_eq!(list[1].info.num_channels, 12);
        assert_eq!(list[1].info.bus_width_bits(), 64);
    }

    #[test]
    fn registration_limits() {
        let mut driver = Driver::new(EngineConfig::default()).unwrap();
        for id in 0..5 {
            add(&mut driver, id, 1);
        }
        let fpga = SimFpga::new(1);
        assert_eq!(
            driver
                .add_fpga(descriptor(9, 1), fpga.bank(), &fpga.mem)
                .err(),
            Some(Error::Config(ConfigError::TooManyFpgas))
        );

        let mut driver = Driver::new(EngineConfig::default()).unwrap();
        add(&mut driver, 4, 1);
        assert_eq!(
            driver
                .add_fpga(descriptor(4, 1), fpga.bank(), &fpga.mem)
                .err(),
            Some(Error::Config(ConfigError::DuplicateFpga))
        );
    }

    #[test]
    fn invalid_config_rejected() {
        let config = EngineConfig::new().with_event_queue_depth(0);
        assert_eq!(
            Driver::new(config).err(),
            Some(Error::Config(ConfigError::InvalidConfig))
        );
    }

    #[test]
    fn unknown_fpga_routes_fail() {
        let mut driver = Driver::new(EngineConfig::default()).unwrap();
        let fpga = add(&mut driver, 0, 2);

        let request = Request::send(0, Box::new(fpga.mem.contiguous(8)));
        assert_eq!(
            driver.submit(3, request).unwrap_err(),
            Error::Request(RequestError::UnknownFpga)
        );
        assert!(driver.reset(3).is_err());
        assert!(driver.snapshot(3, 0, Direction::Send).is_err());
        assert!(!driver.cancel(Ticket { fpga_id: 3, seq: 0 }));
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    #[test]
    fn blocking_transfer_with_fpga_responder() {
        let mut driver = Driver::new(EngineConfig::default()).unwrap();
        let fpga = add(&mut driver, 1, 4);
        driver.start_workers().unwrap();
        assert!(driver.workers_running());
        let device = Arc::clone(driver.device(1).unwrap());

        let data = pattern(1000);
        let responder = {
            let fpga = fpga.clone();
            let data = data.clone();
            std::thread::spawn(move || {
                while !fpga.armed(2, Direction::Receive) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                fpga.announce(2, data.len(), 0, true);
                fpga.ack_descriptors(2, Direction::Receive);
                fpga.deliver(2, &data);
                device.handle_interrupt();
            })
        };

        let request = Request::receive(2, Box::new(fpga.mem.contiguous(1000)))
            .with_timeout(Duration::from_secs(5));
        let completion = driver.transfer(1, request).unwrap();
        responder.join().unwrap();

        assert_eq!(completion.status, Status::Success);
        assert_eq!(completion.result(), Ok(1000));
        assert!(completion.last);
        let mut got = vec![0u8; 1000];
        completion.buffer.read_at(0, &mut got);
        assert_eq!(got, data);
    }

    #[test]
    fn blocking_transfer_times_out() {
        let mut driver = Driver::new(EngineConfig::default()).unwrap();
        let fpga = add(&mut driver, 0, 1);
        driver.start_workers().unwrap();

        let request = Request::send(0, Box::new(fpga.mem.contiguous(16)))
            .with_timeout(Duration::from_millis(10));
        let completion = driver.transfer(0, request).unwrap();
        assert_eq!(completion.status, Status::TimedOut);
        assert_eq!(completion.transferred, 0);
    }

    #[test]
    fn late_fpga_gets_a_worker() {
        let mut driver = Driver::new(EngineConfig::default()).unwrap();
        add(&mut driver, 0, 1);
        driver.start_workers().unwrap();
        let fpga = add(&mut driver, 1, 1);

        let request = Request::send(0, Box::new(fpga.mem.contiguous(16)))
            .with_timeout(Duration::from_millis(10));
        assert_eq!(
            driver.transfer(1, request).unwrap().status,
            Status::TimedOut
        );
        driver.stop_workers();
        assert!(!driver.workers_running());
    }

    #[test]
    fn cancel_and_reset_route_by_id() {
        let mut driver = Driver::new(EngineConfig::default()).unwrap();
        let fpga = add(&mut driver, 2, 2);

        let first = driver
            .submit(2, Request::send(1, Box::new(fpga.mem.contiguous(8))))
            .unwrap();
        let second = driver
            .submit(2, Request::send(1, Box::new(fpga.mem.contiguous(8))))
            .unwrap();
        assert_eq!(driver.snapshot(2, 1, Direction::Send).unwrap().queued, 1);

        assert!(driver.cancel(second));
        driver.reset(2).unwrap();

        let queue = driver.completions();
        assert_eq!(queue.try_take(second).map(|c| c.status), Some(Status::Cancelled));
        assert_eq!(queue.try_take(first).map(|c| c.status), Some(Status::TimedOut));
        assert!(driver.snapshot(2, 1, Direction::Send).unwrap().ready);
        assert_eq!(driver.stats(2).unwrap().interrupts, 0);
    }
}
