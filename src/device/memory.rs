//! In-memory device with fault injection
//!
//! Used by tests and benchmarks. Besides storing pages it records every
//! write and erase in order and can be told to fail, stall or corrupt.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::{check_page, BlockDevice, DeviceError, DeviceResult, Geometry};
use crate::page::{BlockId, Lba};

const ERASED: u8 = 0xFF;

/// RAM-backed [`BlockDevice`]
///
/// ## Concurrency:
/// - Page contents: one RwLock over the whole image
/// - Write/erase logs: Mutex-protected, appended after each success
/// - Fault switches: atomics, settable from any thread
pub struct MemDevice {
    geometry: Geometry,
    data: RwLock<Vec<u8>>,
    write_log: Mutex<Vec<Lba>>,
    erase_log: Mutex<Vec<BlockId>>,
    failing_writes: AtomicU32,
    failing_reads: AtomicU32,
    permanent_fault: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
}

impl MemDevice {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            data: RwLock::new(vec![ERASED; geometry.capacity_bytes() as usize]),
            write_log: Mutex::new(Vec::new()),
            erase_log: Mutex::new(Vec::new()),
            failing_writes: AtomicU32::new(0),
            failing_reads: AtomicU32::new(0),
            permanent_fault: AtomicBool::new(false),
            write_delay: Mutex::new(None),
        }
    }

    // =========================================================================
    // Fault Injection
    // =========================================================================

    /// Flip one payload byte of the page at `lba` so its checksum no longer
    /// matches
    pub fn corrupt(&self, lba: Lba) {
        let offset = self.geometry.offset_of(lba) as usize + 40;
        if let Some(byte) = self.data.write().get_mut(offset) {
            *byte ^= 0x5A;
        }
    }

    /// Fail the next `n` writes with a transient error
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads with a transient error
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make every later operation report a permanent fault
    pub fn set_permanent_fault(&self, on: bool) {
        self.permanent_fault.store(on, Ordering::SeqCst);
    }

    /// Stall every write by `delay`
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// LBAs of successful page writes, in issue order
    pub fn write_log(&self) -> Vec<Lba> {
        self.write_log.lock().clone()
    }

    /// Blocks erased, in issue order
    pub fn erase_log(&self) -> Vec<BlockId> {
        self.erase_log.lock().clone()
    }

    pub fn clear_logs(&self) {
        self.write_log.lock().clear();
        self.erase_log.lock().clear();
    }

    fn check_fault(&self) -> DeviceResult<()> {
        if self.permanent_fault.load(Ordering::SeqCst) {
            return Err(DeviceError::Permanent("device removed".to_string()));
        }
        Ok(())
    }

    /// Consume one injected transient failure, if any are armed
    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected() -> DeviceError {
        DeviceError::Io(io::Error::new(io::ErrorKind::Other, "injected failure"))
    }
}

impl BlockDevice for MemDevice {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read_page(&self, lba: Lba) -> DeviceResult<Vec<u8>> {
        self.check_fault()?;
        check_page(&self.geometry, lba, None)?;
        if Self::take_failure(&self.failing_reads) {
            return Err(Self::injected());
        }
        let start = self.geometry.offset_of(lba) as usize;
        let data = self.data.read();
        Ok(data[start..start + self.geometry.page_size].to_vec())
    }

    fn write_page(&self, lba: Lba, data: &[u8]) -> DeviceResult<()> {
        self.check_fault()?;
        check_page(&self.geometry, lba, Some(data.len()))?;
        if Self::take_failure(&self.failing_writes) {
            return Err(Self::injected());
        }
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let start = self.geometry.offset_of(lba) as usize;
        self.data.write()[start..start + data.len()].copy_from_slice(data);
        self.write_log.lock().push(lba);
        Ok(())
    }

    fn erase_block(&self, block: BlockId) -> DeviceResult<()> {
        self.check_fault()?;
        if block >= self.geometry.blocks {
            return Err(DeviceError::OutOfRange(block as u64));
        }
        let start = self.geometry.offset_of(self.geometry.first_lba(block)) as usize;
        let end = start + self.geometry.block_size();
        self.data.write()[start..end].fill(ERASED);
        self.erase_log.lock().push(block);
        Ok(())
    }

    fn sync(&self) -> DeviceResult<()> {
        self.check_fault()
    }
}
