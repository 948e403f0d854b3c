//! In-memory block device with fault injection.
//!
//! Used for in-memory databases and for deterministic tests. Faults are drawn
//! from a seeded RNG so the same seed always produces the same failures:
//! - Read/write errors
//! - Byte-level corruption on read (caught by block checksums)
//! - Sync failures

use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{BlockDevice, StorageError};

/// Configuration for fault injection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
    /// Probability that a read returns a flipped byte (0.0 - 1.0).
    pub corruption_rate: f64,
}

impl FaultConfig {
    /// No faults.
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }
}

/// Statistics about device operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryDeviceStats {
    pub reads: u64,
    pub writes: u64,
    pub syncs: u64,
    pub injected_faults: u64,
}

struct FaultState {
    config: FaultConfig,
    rng: StdRng,
    stats: MemoryDeviceStats,
}

impl FaultState {
    fn roll(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let hit = self.rng.random_bool(rate.min(1.0));
        if hit {
            self.stats.injected_faults += 1;
        }
        hit
    }
}

/// In-memory storage for tests and in-memory databases.
///
/// Reads take `&self`; the fault RNG and counters sit behind a mutex so that
/// concurrent readers stay deterministic per call order.
pub struct MemoryDevice {
    data: Vec<u8>,
    faults: Arc<Mutex<FaultState>>,
}

/// Shared handle for changing a device's faults after it has been handed to
/// a block file.
#[derive(Clone)]
pub struct FaultHandle {
    faults: Arc<Mutex<FaultState>>,
}

impl FaultHandle {
    /// Replace the fault configuration.
    pub fn set_config(&self, config: FaultConfig) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .config = config;
    }

    /// Snapshot of the operation counters.
    #[must_use]
    pub fn stats(&self) -> MemoryDeviceStats {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats
    }
}

impl MemoryDevice {
    /// Create an empty device with no fault injection.
    #[must_use]
    pub fn new() -> Self {
        Self::with_faults(0, FaultConfig::default())
    }

    /// Create an empty device with the given seed and fault configuration.
    #[must_use]
    pub fn with_faults(seed: u64, config: FaultConfig) -> Self {
        Self {
            data: Vec::new(),
            faults: Arc::new(Mutex::new(FaultState {
                config,
                rng: StdRng::seed_from_u64(seed),
                stats: MemoryDeviceStats::default(),
            })),
        }
    }

    /// Handle that keeps controlling faults once the device is boxed.
    #[must_use]
    pub fn fault_handle(&self) -> FaultHandle {
        FaultHandle {
            faults: Arc::clone(&self.faults),
        }
    }

    /// Snapshot of the operation counters.
    #[must_use]
    pub fn stats(&self) -> MemoryDeviceStats {
        self.fault_handle().stats()
    }

    /// Flip one byte of stored data. Used to simulate media corruption.
    pub fn corrupt_byte(&mut self, offset: usize) {
        if let Some(b) = self.data.get_mut(offset) {
            *b ^= 0xFF;
        }
    }

    fn range(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>, StorageError> {
        let start = usize::try_from(offset)
            .map_err(|_| StorageError::Corruption(format!("offset {offset} too large")))?;
        let end = start + len;
        if end > self.data.len() {
            return Err(StorageError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        Ok(start..end)
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for MemoryDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let range = self.range(offset, buf.len())?;
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.stats.reads += 1;

        let read_rate = faults.config.read_error_rate;
        if faults.roll(read_rate) {
            return Err(StorageError::InjectedFault(format!(
                "read error at offset {offset}"
            )));
        }

        buf.copy_from_slice(&self.data[range]);

        let corruption_rate = faults.config.corruption_rate;
        if !buf.is_empty() && faults.roll(corruption_rate) {
            let idx = faults.rng.random_range(0..buf.len());
            buf[idx] ^= 0xFF;
        }
        drop(faults);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        let range = self.range(offset, buf.len())?;
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.stats.writes += 1;

        let write_rate = faults.config.write_error_rate;
        if faults.roll(write_rate) {
            return Err(StorageError::InjectedFault(format!(
                "write error at offset {offset}"
            )));
        }
        drop(faults);

        self.data[range].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> Result<(), StorageError> {
        let len = usize::try_from(len)
            .map_err(|_| StorageError::Corruption(format!("length {len} too large")))?;
        self.data.resize(len, 0);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.stats.syncs += 1;

        let sync_rate = faults.config.sync_error_rate;
        if faults.roll(sync_rate) {
            return Err(StorageError::InjectedFault("sync error".to_string()));
        }
        Ok(())
    }
}
