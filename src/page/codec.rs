//! Page codec
//!
//! Encodes pages into aligned, checksummed device images and decodes them back.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{BlitzError, Result};

use super::{Entry, Lba, Page, RegionTag, SizeClass};

// =============================================================================
// Format Constants
// =============================================================================

/// Magic bytes identifying a BlitzKV page
pub(crate) const MAGIC: &[u8; 4] = b"BKV1";

/// Current page format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Region (1) + SizeClass (1)
/// + PageId (8) + Lba (8) + PayloadLen (4) + CRC32 (4) = 32 bytes
pub const HEADER_SIZE: usize = 32;

/// Offset of the CRC field; everything before it is covered by the checksum
const CRC_OFFSET: usize = 28;

impl Page {
    /// Encode into a zero-padded image of exactly one size class.
    ///
    /// Records the computed checksum on the page.
    pub fn encode(&mut self) -> Result<Bytes> {
        let payload = bincode::serialize(&self.entries)?;
        let size = self.size_class.bytes();

        if HEADER_SIZE + payload.len() > size {
            return Err(BlitzError::Serialization(format!(
                "page {} payload of {} bytes overflows a {} byte page",
                self.id,
                payload.len(),
                size
            )));
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_slice(MAGIC);
        buf.put_u16_le(VERSION);
        buf.put_u8(self.region.to_u8());
        buf.put_u8(self.size_class.to_u8());
        buf.put_u64_le(self.id);
        buf.put_u64_le(self.lba);
        buf.put_u32_le(payload.len() as u32);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf[..CRC_OFFSET]);
        hasher.update(&payload);
        let crc = hasher.finalize();

        buf.put_u32_le(crc);
        buf.put_slice(&payload);
        buf.resize(size, 0);

        self.checksum = crc;
        Ok(buf.freeze())
    }

    /// Decode an image read from `lba`.
    ///
    /// Fails with `Corrupted` on any framing or checksum problem. The header's
    /// own page id and LBA are returned as stored; callers compare them with
    /// the location they expected.
    pub fn decode(lba: Lba, image: &[u8]) -> Result<Page> {
        let corrupted = |reason: String| BlitzError::Corrupted { lba, reason };

        if image.len() < HEADER_SIZE {
            return Err(corrupted(format!("short image of {} bytes", image.len())));
        }

        let mut header = &image[..HEADER_SIZE];

        let mut magic = [0u8; 4];
        header.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(corrupted(format!("bad magic {:?}", magic)));
        }

        let version = header.get_u16_le();
        if version != VERSION {
            return Err(corrupted(format!("unsupported version {}", version)));
        }

        let region_tag = header.get_u8();
        let region = RegionTag::from_u8(region_tag)
            .ok_or_else(|| corrupted(format!("unknown region tag {}", region_tag)))?;

        let class_tag = header.get_u8();
        let size_class = SizeClass::from_u8(class_tag)
            .ok_or_else(|| corrupted(format!("unknown size class {}", class_tag)))?;

        let id = header.get_u64_le();
        let stored_lba = header.get_u64_le();
        let payload_len = header.get_u32_le() as usize;
        let stored_crc = header.get_u32_le();

        if HEADER_SIZE + payload_len > image.len() || HEADER_SIZE + payload_len > size_class.bytes()
        {
            return Err(corrupted(format!(
                "payload length {} overruns the page",
                payload_len
            )));
        }

        let payload = &image[HEADER_SIZE..HEADER_SIZE + payload_len];

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&image[..CRC_OFFSET]);
        hasher.update(payload);
        let crc = hasher.finalize();
        if crc != stored_crc {
            return Err(corrupted(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, crc
            )));
        }

        let entries: Vec<Entry> = bincode::deserialize(payload)
            .map_err(|e| corrupted(format!("undecodable payload: {}", e)))?;

        Ok(Page {
            id,
            lba: stored_lba,
            region,
            size_class,
            dirty: false,
            checksum: crc,
            entries,
            payload_len,
        })
    }
}
