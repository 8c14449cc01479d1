// GuardBand - Persisted Daily Record
//
// Fixed 16-byte little-endian record at `RECORD_OFFSET` of a settings region:
//
//   0..2   magic "GB"          8..10  active minutes (u16)
//   2      version             10..14 reserved, zero
//   3      sleep quality (%)   14..16 Fletcher-16 of bytes 0..14
//   4..8   steps (u32)
//
// A record that fails any check is replaced by the zeroed default at load;
// corruption is logged, never propagated.

use thiserror::Error;

use crate::config::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DailyCounters {
    pub steps: u32,
    pub active_minutes: u16,
    pub sleep_quality: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record truncated: only {0} bytes")]
    Truncated(usize),
    #[error("bad magic {0:#06x}")]
    BadMagic(u16),
    #[error("unsupported record version {0}")]
    Version(u8),
    #[error("checksum mismatch (stored {stored:#06x}, computed {computed:#06x})")]
    Checksum { stored: u16, computed: u16 },
    #[error("implausible {field}: {value}")]
    Implausible { field: &'static str, value: u32 },
}

/// Byte-addressed settings storage (NVS blob on the device, memory in tests).
pub trait RecordStore {
    /// Fill as much of `buf` as the region holds from `offset`; returns bytes read.
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> anyhow::Result<usize>;
    fn write(&mut self, offset: usize, data: &[u8]) -> anyhow::Result<()>;
}

fn fletcher16(data: &[u8]) -> u16 {
    let (mut a, mut b) = (0u16, 0u16);
    for &byte in data {
        a = (a + byte as u16) % 255;
        b = (b + a) % 255;
    }
    (b << 8) | a
}

impl DailyCounters {
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut rec = [0u8; RECORD_LEN];
        rec[0..2].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        rec[2] = RECORD_VERSION;
        rec[3] = self.sleep_quality;
        rec[4..8].copy_from_slice(&self.steps.to_le_bytes());
        rec[8..10].copy_from_slice(&self.active_minutes.to_le_bytes());
        let sum = fletcher16(&rec[..14]);
        rec[14..16].copy_from_slice(&sum.to_le_bytes());
        rec
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < RECORD_LEN {
            return Err(RecordError::Truncated(bytes.len()));
        }
        let rec = &bytes[..RECORD_LEN];

        let magic = u16::from_le_bytes([rec[0], rec[1]]);
        if magic != RECORD_MAGIC {
            return Err(RecordError::BadMagic(magic));
        }
        if rec[2] != RECORD_VERSION {
            return Err(RecordError::Version(rec[2]));
        }
        let stored = u16::from_le_bytes([rec[14], rec[15]]);
        let computed = fletcher16(&rec[..14]);
        if stored != computed {
            return Err(RecordError::Checksum { stored, computed });
        }

        let counters = Self {
            sleep_quality: rec[3],
            steps: u32::from_le_bytes([rec[4], rec[5], rec[6], rec[7]]),
            active_minutes: u16::from_le_bytes([rec[8], rec[9]]),
        };
        counters.check_plausible()?;
        Ok(counters)
    }

    pub fn check_plausible(&self) -> Result<(), RecordError> {
        if self.steps > MAX_PLAUSIBLE_STEPS {
            return Err(RecordError::Implausible { field: "steps", value: self.steps });
        }
        if self.active_minutes > MAX_ACTIVE_MINUTES {
            return Err(RecordError::Implausible {
                field: "active minutes",
                value: self.active_minutes as u32,
            });
        }
        if self.sleep_quality > MAX_SLEEP_QUALITY {
            return Err(RecordError::Implausible {
                field: "sleep quality",
                value: self.sleep_quality as u32,
            });
        }
        Ok(())
    }
}

/// Load the daily record, falling back to zeroed counters on any failure.
pub fn load_or_default(store: &mut dyn RecordStore) -> DailyCounters {
    let mut buf = [0u8; RECORD_LEN];
    let read = match store.read(RECORD_OFFSET, &mut buf) {
        Ok(n) => n,
        Err(e) => {
            log::warn!("Daily record unreadable ({}), starting from zero", e);
            return DailyCounters::default();
        }
    };
    match DailyCounters::decode(&buf[..read]) {
        Ok(counters) => {
            log::info!(
                "Restored daily record: {} steps, {} active min",
                counters.steps,
                counters.active_minutes
            );
            counters
        }
        Err(e) => {
            log::warn!("Daily record rejected ({}), starting from zero", e);
            DailyCounters::default()
        }
    }
}

pub fn save(store: &mut dyn RecordStore, counters: &DailyCounters) -> anyhow::Result<()> {
    store.write(RECORD_OFFSET, &counters.encode())?;
    log::debug!("Daily record saved ({} steps)", counters.steps);
    Ok(())
}

/// In-memory settings region, used by tests and the host replay tool.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    pub bytes: Vec<u8>,
    pub fail_io: bool,
}

impl RecordStore for MemoryRecordStore {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> anyhow::Result<usize> {
        anyhow::ensure!(!self.fail_io, "storage offline");
        let avail = self.bytes.get(offset..).unwrap_or(&[]);
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        Ok(n)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> anyhow::Result<()> {
        anyhow::ensure!(!self.fail_io, "storage offline");
        let end = offset + data.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0xFF);
        }
        self.bytes[offset..end].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DailyCounters {
        DailyCounters {
            steps: 8421,
            active_minutes: 57,
            sleep_quality: 80,
        }
    }

    #[test]
    fn test_save_then_load() {
        let mut store = MemoryRecordStore::default();
        save(&mut store, &sample()).unwrap();
        assert_eq!(load_or_default(&mut store), sample());
    }

    #[test]
    fn test_blank_region_loads_default() {
        let mut store = MemoryRecordStore::default();
        assert_eq!(load_or_default(&mut store), DailyCounters::default());
        let mut erased = MemoryRecordStore {
            bytes: vec![0xFF; 32],
            fail_io: false,
        };
        assert_eq!(load_or_default(&mut erased), DailyCounters::default());
    }

    #[test]
    fn test_flipped_byte_rejected() {
        let mut rec = sample().encode();
        rec[5] ^= 0x40;
        assert!(matches!(DailyCounters::decode(&rec), Err(RecordError::Checksum { .. })));
    }

    #[test]
    fn test_implausible_values_reset_to_zero() {
        let bogus = DailyCounters {
            steps: MAX_PLAUSIBLE_STEPS + 1,
            ..sample()
        };
        // Checksum is valid, range check is what rejects it.
        assert_eq!(
            DailyCounters::decode(&bogus.encode()),
            Err(RecordError::Implausible { field: "steps", value: MAX_PLAUSIBLE_STEPS + 1 })
        );
        let mut store = MemoryRecordStore::default();
        store.write(RECORD_OFFSET, &bogus.encode()).unwrap();
        assert_eq!(load_or_default(&mut store), DailyCounters::default());

        let restless = DailyCounters {
            sleep_quality: 101,
            ..sample()
        };
        assert!(DailyCounters::decode(&restless.encode()).is_err());
    }

    #[test]
    fn test_wrong_version_and_magic() {
        let mut rec = sample().encode();
        rec[2] = 9;
        assert_eq!(DailyCounters::decode(&rec), Err(RecordError::Version(9)));
        let mut rec = sample().encode();
        rec[0] = 0;
        assert!(matches!(DailyCounters::decode(&rec), Err(RecordError::BadMagic(_))));
        assert_eq!(DailyCounters::decode(&rec[..4]), Err(RecordError::Truncated(4)));
    }

    #[test]
    fn test_storage_failure_is_not_fatal() {
        let mut store = MemoryRecordStore {
            bytes: Vec::new(),
            fail_io: true,
        };
        assert_eq!(load_or_default(&mut store), DailyCounters::default());
        assert!(save(&mut store, &sample()).is_err());
    }
}
