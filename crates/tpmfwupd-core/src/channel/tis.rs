//! TIS (TPM Interface Specification) register-level transport.
//!
//! Maps the chip's register window out of `/dev/mem` at a platform-fixed
//! physical base address, indexed by locality at 4 KiB stride, and drives
//! the standard TIS handshake: wait for `valid`, request the locality, pump
//! command bytes into the FIFO respecting `burstCount`, kick `tpmGo`, poll
//! `dataAvail` with capped exponential back-off, drain the response
//! respecting `burstCount`, release the locality.

use super::{DeviceChannel, PrivilegeDrop};
use crate::error::{CoreError, CoreResult};
use std::time::{Duration, Instant};

/// Register window size per locality.
const REGISTER_WINDOW_LEN: usize = 0x1000;
/// Stride between successive localities.
const LOCALITY_STRIDE: u64 = 0x1000;

const REG_ACCESS: usize = 0x00;
const REG_STS: usize = 0x18;
const REG_DATA_FIFO: usize = 0x24;

const ACCESS_VALID: u8 = 1 << 7;
const ACCESS_ACTIVE_LOCALITY: u8 = 1 << 5;
const ACCESS_REQUEST_USE: u8 = 1 << 1;

const STS_VALID: u8 = 1 << 7;
const STS_GO: u8 = 1 << 5;
const STS_DATA_AVAIL: u8 = 1 << 4;

/// Poll step floor/ceiling: each wait yields to the scheduler for roughly
/// this long, backing off from the floor up to the ceiling as a wait drags
/// on.
const POLL_FLOOR: Duration = Duration::from_micros(1);
const POLL_CEILING: Duration = Duration::from_millis(1);

pub struct TisChannel {
    base_addr: u64,
    locality: u8,
    privilege: Box<dyn PrivilegeDrop>,
    mapping: Option<Mapping>,
}

/// Owns the mmap'd register window and unmaps it on drop, regardless of how
/// `disconnect` is invoked.
struct Mapping {
    ptr: *mut u8,
    len: usize,
    _file: std::fs::File,
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            let _ = nix::sys::mman::munmap(
                std::ptr::NonNull::new_unchecked(self.ptr as *mut core::ffi::c_void),
                self.len,
            );
        }
    }
}

impl TisChannel {
    pub fn new(base_addr: u64, locality: u8, privilege: Box<dyn PrivilegeDrop>) -> Self {
        Self {
            base_addr,
            locality,
            privilege,
            mapping: None,
        }
    }

    fn map_registers(&mut self) -> CoreResult<()> {
        use nix::sys::mman::{mmap, MapFlags, ProtFlags};
        use std::fs::OpenOptions;
        use std::num::NonZeroUsize;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/mem")
            .map_err(|_| CoreError::Internal)?;

        let offset = self.base_addr as i64 + (self.locality as i64) * (LOCALITY_STRIDE as i64);
        let len = NonZeroUsize::new(REGISTER_WINDOW_LEN).ok_or(CoreError::Internal)?;

        let addr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                Some(&file),
                offset,
            )
        }
        .map_err(|_| CoreError::Internal)?;

        self.mapping = Some(Mapping {
            ptr: addr.as_ptr() as *mut u8,
            len: REGISTER_WINDOW_LEN,
            _file: file,
        });
        Ok(())
    }

    fn reg_ptr(&self, offset: usize) -> CoreResult<*mut u8> {
        let mapping = self.mapping.as_ref().ok_or(CoreError::NotConnected)?;
        Ok(unsafe { mapping.ptr.add(offset) })
    }

    fn read_u8(&self, offset: usize) -> CoreResult<u8> {
        let ptr = self.reg_ptr(offset)?;
        Ok(unsafe { std::ptr::read_volatile(ptr) })
    }

    fn write_u8(&self, offset: usize, v: u8) -> CoreResult<()> {
        let ptr = self.reg_ptr(offset)?;
        unsafe { std::ptr::write_volatile(ptr, v) };
        Ok(())
    }

    fn read_access(&self) -> CoreResult<u8> {
        self.read_u8(REG_ACCESS)
    }

    fn read_status(&self) -> CoreResult<u8> {
        self.read_u8(REG_STS)
    }

    fn read_burst_count(&self) -> CoreResult<u16> {
        let lo = self.read_u8(REG_STS + 1)?;
        let hi = self.read_u8(REG_STS + 2)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn wait_for(&self, mut predicate: impl FnMut() -> CoreResult<bool>, max_duration: Duration) -> CoreResult<()> {
        let start = Instant::now();
        let mut backoff = POLL_FLOOR;
        loop {
            if predicate()? {
                return Ok(());
            }
            if start.elapsed() >= max_duration {
                return Err(CoreError::TimedOut);
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(POLL_CEILING);
        }
    }

    fn release_locality(&self) -> CoreResult<()> {
        self.write_u8(REG_ACCESS, ACCESS_ACTIVE_LOCALITY)
    }
}

impl DeviceChannel for TisChannel {
    fn connect(&mut self) -> CoreResult<()> {
        if self.mapping.is_some() {
            return Err(CoreError::AlreadyConnected);
        }
        self.map_registers()?;
        self.privilege.drop_privileges()?;
        Ok(())
    }

    fn disconnect(&mut self) -> CoreResult<()> {
        if self.mapping.is_none() {
            return Err(CoreError::NotConnected);
        }
        let _ = self.release_locality();
        self.mapping = None; // runs Mapping::drop, unmapping the window
        Ok(())
    }

    fn transmit(&mut self, command: &[u8], response: &mut [u8], max_duration_us: u64) -> CoreResult<usize> {
        if self.mapping.is_none() {
            return Err(CoreError::NotConnected);
        }
        let max_duration = Duration::from_micros(max_duration_us);

        self.wait_for(|| Ok(self.read_access()? & ACCESS_VALID != 0), max_duration)?;
        self.write_u8(REG_ACCESS, ACCESS_REQUEST_USE)?;
        self.wait_for(|| Ok(self.read_access()? & ACCESS_ACTIVE_LOCALITY != 0), max_duration)?;

        let mut sent = 0usize;
        while sent < command.len() {
            let burst = (self.read_burst_count()?.max(1)) as usize;
            let chunk = burst.min(command.len() - sent);
            for &b in &command[sent..sent + chunk] {
                self.write_u8(REG_DATA_FIFO, b)?;
            }
            sent += chunk;
        }
        self.write_u8(REG_STS, STS_GO)?;

        self.wait_for(|| Ok(self.read_status()? & STS_DATA_AVAIL != 0), max_duration)?;

        let mut received = 0usize;
        loop {
            let burst = (self.read_burst_count()?.max(1)) as usize;
            let mut taken_this_round = 0usize;
            while taken_this_round < burst && received < response.len() {
                response[received] = self.read_u8(REG_DATA_FIFO)?;
                received += 1;
                taken_this_round += 1;
            }
            if self.read_status()? & STS_DATA_AVAIL == 0 || received >= response.len() {
                break;
            }
        }

        self.release_locality()?;
        Ok(received)
    }

    fn is_connected(&self) -> bool {
        self.mapping.is_some()
    }
}
