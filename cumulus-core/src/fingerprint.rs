//! Content fingerprints.
//!
//! The light fingerprint is `(size, mtime)` and exists only for the
//! post-restart fsid recovery pass; it must come out identical for a
//! byte-identical file before and after a restart. The full fingerprint adds
//! a CRC over sparse samples of the file body and is what reconciliation
//! uses to decide content equality.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const CRC_SAMPLE_WINDOW: u64 = 4096;
const CRC_SAMPLE_COUNT: u64 = 8;

/// Size and mtime only, plus a commutative combine so folder aggregates do
/// not depend on child enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LightFingerprint {
    pub size: i64,
    pub mtime: i64,
}

impl LightFingerprint {
    pub fn of_file(size: i64, mtime: i64) -> Self {
        Self { size, mtime }
    }

    /// Folds `child` into this aggregate. Wrapping addition of a scrambled
    /// child hash keeps the operation commutative and associative, and
    /// duplicate children still contribute (unlike xor).
    pub fn combine(&mut self, child: &LightFingerprint) {
        let h = scramble((child.size as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ child.mtime as u64);
        self.size = self.size.wrapping_add(h as i64);
        self.mtime = self.mtime.wrapping_add((h >> 32) as i64);
    }
}

fn scramble(mut v: u64) -> u64 {
    // splitmix64 finalizer
    v = v.wrapping_add(0x9e37_79b9_7f4a_7c15);
    v = (v ^ (v >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    v = (v ^ (v >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    v ^ (v >> 31)
}

/// Full content fingerprint: `(size, mtime, crc)` where the CRC covers up to
/// eight evenly-spaced 4 KiB windows of the file. `valid` is false until the
/// body has actually been sampled; a file must never be uploaded with an
/// invalid fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFingerprint {
    pub size: i64,
    pub mtime: i64,
    pub crc: u32,
    pub valid: bool,
}

impl FileFingerprint {
    /// Fingerprint for an entry whose body has not been read (folders, or
    /// files we only know from cached metadata).
    pub fn metadata_only(size: i64, mtime: i64) -> Self {
        Self {
            size,
            mtime,
            crc: 0,
            valid: false,
        }
    }

    /// A fingerprint reported by the cloud side, taken at face value.
    pub fn remote(size: i64, mtime: i64, crc: u32) -> Self {
        Self {
            size,
            mtime,
            crc,
            valid: true,
        }
    }

    /// Reads sparse samples of `path` and produces a valid fingerprint.
    pub fn generate(path: &Path, size: i64, mtime: i64) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Crc32::new();
        let len = size.max(0) as u64;

        if len <= CRC_SAMPLE_WINDOW * CRC_SAMPLE_COUNT {
            let mut buf = Vec::with_capacity(len as usize);
            file.read_to_end(&mut buf)?;
            hasher.update(&buf);
        } else {
            let stride = (len - CRC_SAMPLE_WINDOW) / (CRC_SAMPLE_COUNT - 1);
            let mut buf = vec![0u8; CRC_SAMPLE_WINDOW as usize];
            for sample in 0..CRC_SAMPLE_COUNT {
                let offset = sample * stride;
                file.seek(SeekFrom::Start(offset))?;
                let read = read_fully(&mut file, &mut buf)?;
                hasher.update(&buf[..read]);
            }
        }

        Ok(Self {
            size,
            mtime,
            crc: hasher.finalize(),
            valid: true,
        })
    }

    pub fn light(&self) -> LightFingerprint {
        LightFingerprint {
            size: self.size,
            mtime: self.mtime,
        }
    }

    /// Content equality as far as reconciliation is concerned. Only
    /// meaningful between two valid fingerprints.
    pub fn matches(&self, other: &FileFingerprint) -> bool {
        self.valid
            && other.valid
            && self.size == other.size
            && self.mtime == other.mtime
            && self.crc == other.crc
    }
}

fn read_fully(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// CRC-32C (Castagnoli), table-driven.
pub struct Crc32 {
    state: u32,
}

const fn make_crc32c_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x82f6_3b78
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

impl Crc32 {
    const TABLE: [u32; 256] = make_crc32c_table();

    pub fn new() -> Self {
        Self { state: 0xffff_ffff }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let idx = ((self.state ^ byte as u32) & 0xff) as usize;
            self.state = (self.state >> 8) ^ Self::TABLE[idx];
        }
    }

    pub fn finalize(&self) -> u32 {
        self.state ^ 0xffff_ffff
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}
