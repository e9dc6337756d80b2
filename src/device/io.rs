//! Retrying device front end
//!
//! Every device call made by the storage core goes through [`DeviceIo`]:
//!
//! ```text
//!   attempt ──ok──▶ record latency ──▶ done
//!      │
//!      ├─ transient (Io / slow write) ──▶ sleep base·2ⁿ (capped) ──▶ attempt
//!      │                                  (at most max_retries times)
//!      ├─ permanent ──▶ DeviceFault (fatal)
//!      └─ misaligned / out of range ──▶ Device error, not retried
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use super::{BlockDevice, DeviceError, DeviceResult, Geometry};
use crate::config::IoPolicy;
use crate::error::{BlitzError, Result};
use crate::metrics::{Counter, Metrics};
use crate::page::{BlockId, Lba};

/// Retry, timeout and metrics wrapper around a [`BlockDevice`]
pub struct DeviceIo {
    device: Arc<dyn BlockDevice>,
    geometry: Geometry,
    policy: IoPolicy,
    metrics: Arc<Metrics>,
}

impl DeviceIo {
    pub fn new(device: Arc<dyn BlockDevice>, policy: IoPolicy, metrics: Arc<Metrics>) -> Self {
        let geometry = device.geometry();
        Self {
            device,
            geometry,
            policy,
            metrics,
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.policy
            .base_backoff
            .saturating_mul(factor)
            .min(self.policy.max_backoff)
    }

    /// Run `f` under the retry policy
    fn retry<T>(&self, op: &'static str, lba: Lba, mut f: impl FnMut() -> DeviceResult<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            let err = match f() {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if err.is_permanent() {
                error!(op, lba, error = %err, "permanent device fault");
                return Err(BlitzError::DeviceFault(err.to_string()));
            }
            if !err.is_transient() || attempt >= self.policy.max_retries {
                if err.is_transient() {
                    warn!(op, lba, attempts = attempt + 1, error = %err, "retry budget exhausted");
                }
                return Err(BlitzError::Device { op, source: err });
            }

            let delay = self.backoff(attempt);
            warn!(op, lba, attempt = attempt + 1, ?delay, error = %err, "transient device error, retrying");
            self.metrics.incr(Counter::Retries);
            thread::sleep(delay);
            attempt += 1;
        }
    }

    /// Read one page
    pub fn read_page(&self, lba: Lba) -> Result<Vec<u8>> {
        self.retry("read", lba, || {
            let start = Instant::now();
            let page = self.device.read_page(lba)?;
            self.metrics.record_read(page.len(), start.elapsed());
            Ok(page)
        })
    }

    /// Write one page. A write that outlives the timeout is treated as failed
    /// and re-issued; page writes are idempotent.
    pub fn write_page(&self, lba: Lba, data: &[u8]) -> Result<()> {
        self.retry("write", lba, || {
            let start = Instant::now();
            self.device.write_page(lba, data)?;
            let elapsed = start.elapsed();
            if elapsed > self.policy.timeout {
                return Err(DeviceError::TimedOut(self.policy.timeout));
            }
            self.metrics.record_write(data.len(), elapsed);
            Ok(())
        })
    }

    /// Read `pages` consecutive pages starting at `lba`
    pub fn read_span(&self, lba: Lba, pages: u32) -> Result<Vec<u8>> {
        let mut image = Vec::with_capacity(pages as usize * self.geometry.page_size);
        for i in 0..pages as Lba {
            image.extend_from_slice(&self.read_page(lba + i)?);
        }
        Ok(image)
    }

    /// Write a multi-page image in ascending LBA order
    pub fn write_span(&self, lba: Lba, image: &[u8]) -> Result<()> {
        let page_size = self.geometry.page_size;
        if image.len() % page_size != 0 {
            return Err(BlitzError::Device {
                op: "write",
                source: DeviceError::Misaligned {
                    len: image.len(),
                    page_size,
                },
            });
        }
        for (i, chunk) in image.chunks(page_size).enumerate() {
            self.write_page(lba + i as Lba, chunk)?;
        }
        Ok(())
    }

    /// Erase one block
    pub fn erase(&self, block: BlockId) -> Result<()> {
        let lba = self.geometry.first_lba(block);
        self.retry("erase", lba, || self.device.erase_block(block))?;
        self.metrics.incr(Counter::Erases);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.retry("sync", 0, || self.device.sync())
    }
}
