// GuardBand - NVS Settings Region
//
// The persisted record lives in a fixed-size blob in its own NVS namespace.
// Byte offsets are relative to that blob, so the record codec stays
// unaware of NVS.

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use guardband::config::*;
use guardband::persist::RecordStore;

pub struct NvsRecordStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsRecordStore {
    pub fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self { nvs })
    }

    /// Whole region; an absent blob reads as erased flash.
    fn region(&self) -> anyhow::Result<[u8; NVS_REGION_LEN]> {
        let mut region = [0xFF; NVS_REGION_LEN];
        let mut buf = [0u8; NVS_REGION_LEN];
        if let Some(stored) = self.nvs.get_blob(NVS_RECORD_KEY, &mut buf)? {
            let n = stored.len().min(NVS_REGION_LEN);
            region[..n].copy_from_slice(&stored[..n]);
        }
        Ok(region)
    }
}

impl RecordStore for NvsRecordStore {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> anyhow::Result<usize> {
        let region = self.region()?;
        let avail = region.get(offset..).unwrap_or(&[]);
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        Ok(n)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> anyhow::Result<()> {
        let end = offset + data.len();
        anyhow::ensure!(end <= NVS_REGION_LEN, "write past settings region ({} > {})", end, NVS_REGION_LEN);
        let mut region = self.region()?;
        region[offset..end].copy_from_slice(data);
        self.nvs.set_blob(NVS_RECORD_KEY, &region)?;
        Ok(())
    }
}
