//! Deferred-context worker
//!
//! One thread per FPGA drains the device's event ring and enforces its
//! deadlines. The thread parks until the interrupt handler wakes it, a
//! submission arms a new deadline, or the earliest deadline passes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error, info};

use crate::device::FpgaDevice;
use crate::error::{ConfigError, ConfigResult};

/// Handle to a running worker thread
pub struct Worker {
    fpga_id: u64,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start a worker for `device` on a thread called `name`
    pub fn spawn(device: Arc<FpgaDevice>, name: String) -> ConfigResult<Self> {
        let fpga_id = device.id();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run(&device, &flag))
            .map_err(|_| ConfigError::WorkerSpawnFailed)?;

        Ok(Self {
            fpga_id,
            shutdown,
            handle: Some(handle),
        })
    }

    /// FPGA this worker serves
    pub fn fpga_id(&self) -> u64 {
        self.fpga_id
    }

    /// Check if the thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Release);
        handle.thread().unpark();
        if handle.join().is_err() {
            error!("worker for FPGA {} panicked", self.fpga_id);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(device: &FpgaDevice, shutdown: &AtomicBool) {
    info!("{}: worker started", device.descriptor().name);
    let me = thread::current();

    while !shutdown.load(Ordering::Acquire) {
        // Register before draining so an event queued after the drain still
        // unparks us
        device.waker().register(me.clone());
        let done = device.expire_timeouts(Instant::now());
        if done > 0 {
            debug!("{}: delivered {} completions", device.descriptor().name, done);
        }
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        match device.next_deadline() {
            Some(at) => {
                let now = Instant::now();
                if at > now {
                    thread::park_timeout(at - now);
                }
            }
            None => thread::park(),
        }
    }
    info!("{}: worker stopped", device.descriptor().name);
}
