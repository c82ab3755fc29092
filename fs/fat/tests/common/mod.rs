// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte-level image builders and storage wrappers shared by the
//! integration tests.
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicIsize, Ordering},
    Arc,
};

use hyrax_ds::{DataStorage, Error, IoError, Result};
use hyrax_ds_std::RamDisk;
use hyrax_fs::time::{Clock, FixedClock, Timestamp};
use hyrax_fs_fat::FileSystemServer;

pub const SECTOR: usize = 512;

// FAT16 test geometry: 4 KiB clusters, 4200 data clusters, 512 root
// entries. 1 reserved sector, 2 FATs of 17 sectors, 32 root sectors.
pub const FAT16_FAT_OFFSET: usize = SECTOR;
pub const FAT16_ROOT_OFFSET: usize = 35 * SECTOR;
pub const FAT16_DATA_OFFSET: usize = 67 * SECTOR;
pub const FAT16_CLUSTER_SIZE: usize = 4096;
const FAT16_SECTORS: usize = 33667;
const FAT16_TOTAL_CLUSTERS: u32 = 4200;

/// Formats a FAT16 volume with `free_clusters` usable clusters; the rest
/// are marked bad.
pub fn fat16_image(free_clusters: u32) -> RamDisk {
    let mut image = vec![0u8; FAT16_SECTORS * SECTOR];

    image[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    image[3..11].copy_from_slice(b"MSWIN4.1");
    image[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    image[13] = 8; // sectors per cluster
    image[14..16].copy_from_slice(&1u16.to_le_bytes()); // reserved
    image[16] = 2; // FATs
    image[17..19].copy_from_slice(&512u16.to_le_bytes()); // root entries
    image[19..21].copy_from_slice(&(FAT16_SECTORS as u16).to_le_bytes());
    image[21] = 0xF8; // media
    image[22..24].copy_from_slice(&17u16.to_le_bytes()); // sectors per FAT
    image[510..512].copy_from_slice(&[0x55, 0xAA]);

    for fat_offset in [FAT16_FAT_OFFSET, FAT16_FAT_OFFSET + 17 * SECTOR] {
        let entry = |image: &mut Vec<u8>, index: u32, value: u16| {
            let at = fat_offset + index as usize * 2;
            image[at..at + 2].copy_from_slice(&value.to_le_bytes());
        };
        entry(&mut image, 0, 0xFFF8);
        // Bit 15 set: cleanly unmounted.
        entry(&mut image, 1, 0xFFFF);
        for index in 2 + free_clusters..FAT16_TOTAL_CLUSTERS + 2 {
            entry(&mut image, index, 0xFFF7);
        }
    }

    RamDisk::from_vec(image)
}

// FAT12 test geometry: a 1.44 MB floppy.
pub const FAT12_DATA_OFFSET: usize = 33 * SECTOR;

pub fn fat12_image() -> RamDisk {
    let mut image = vec![0u8; 2880 * SECTOR];

    image[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    image[3..11].copy_from_slice(b"MSDOS5.0");
    image[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    image[13] = 1;
    image[14..16].copy_from_slice(&1u16.to_le_bytes());
    image[16] = 2;
    image[17..19].copy_from_slice(&224u16.to_le_bytes());
    image[19..21].copy_from_slice(&2880u16.to_le_bytes());
    image[21] = 0xF0;
    image[22..24].copy_from_slice(&9u16.to_le_bytes());
    image[510..512].copy_from_slice(&[0x55, 0xAA]);

    for fat_offset in [SECTOR, 10 * SECTOR] {
        image[fat_offset..fat_offset + 3].copy_from_slice(&[0xF0, 0xFF, 0xFF]);
    }

    RamDisk::from_vec(image)
}

// FAT32 test geometry: 512-byte clusters, 65560 data clusters (the
// smallest count that is still FAT32), FS info in sector 1.
pub const FAT32_FAT_OFFSET: usize = 32 * SECTOR;
pub const FAT32_FS_INFO_OFFSET: usize = SECTOR;
pub const FAT32_DATA_OFFSET: usize = 1058 * SECTOR;
pub const FAT32_FREE_CLUSTERS: u32 = 65559;
const FAT32_SECTORS: u32 = 66618;

pub fn fat32_image() -> RamDisk {
    let mut image = vec![0u8; FAT32_SECTORS as usize * SECTOR];

    image[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    image[3..11].copy_from_slice(b"MSWIN4.1");
    image[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    image[13] = 1;
    image[14..16].copy_from_slice(&32u16.to_le_bytes()); // reserved
    image[16] = 2;
    image[21] = 0xF8;
    image[32..36].copy_from_slice(&FAT32_SECTORS.to_le_bytes()); // total sectors
    image[36..40].copy_from_slice(&513u32.to_le_bytes()); // sectors per FAT
    image[44..48].copy_from_slice(&2u32.to_le_bytes()); // root cluster
    image[48..50].copy_from_slice(&1u16.to_le_bytes()); // FS info sector
    image[510..512].copy_from_slice(&[0x55, 0xAA]);

    for fat_offset in [FAT32_FAT_OFFSET, FAT32_FAT_OFFSET + 513 * SECTOR] {
        let entry = |image: &mut Vec<u8>, index: u32, value: u32| {
            let at = fat_offset + index as usize * 4;
            image[at..at + 4].copy_from_slice(&value.to_le_bytes());
        };
        entry(&mut image, 0, 0x0FFF_FFF8);
        // Bit 27 set: cleanly unmounted.
        entry(&mut image, 1, 0xFFFF_FFFF);
        // Root directory, one cluster.
        entry(&mut image, 2, 0x0FFF_FFFF);
    }

    let info = FAT32_FS_INFO_OFFSET;
    image[info..info + 4].copy_from_slice(&0x41615252u32.to_le_bytes());
    image[info + 484..info + 488].copy_from_slice(&0x61417272u32.to_le_bytes());
    image[info + 488..info + 492].copy_from_slice(&FAT32_FREE_CLUSTERS.to_le_bytes());
    image[info + 492..info + 496].copy_from_slice(&3u32.to_le_bytes());
    image[info + 508..info + 512].copy_from_slice(&0xAA550000u32.to_le_bytes());

    RamDisk::from_vec(image)
}

/// Fails the nth storage write (1-based) after arming, then recovers.
#[derive(Clone)]
pub struct FaultyDisk {
    inner: RamDisk,
    writes_until_failure: Arc<AtomicIsize>,
}

impl FaultyDisk {
    pub fn new(inner: RamDisk) -> Self {
        Self {
            inner,
            writes_until_failure: Arc::new(AtomicIsize::new(isize::MIN)),
        }
    }

    pub fn fail_nth_write(&self, n: isize) {
        self.writes_until_failure.store(n, Ordering::SeqCst);
    }
}

impl DataStorage for FaultyDisk {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        self.inner.read(offset, buffer)
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
        if self.writes_until_failure.fetch_sub(1, Ordering::SeqCst) == 1 {
            return Err(Error::Io(IoError::Device));
        }
        self.inner.write(offset, buffer)
    }
}

pub const TEST_TIME: Timestamp = Timestamp {
    year: 2024,
    month: 6,
    day: 1,
    hour: 12,
    minute: 30,
    second: 0,
};

pub fn server<DS: DataStorage>(storage: DS) -> FileSystemServer<DS> {
    FileSystemServer::with_services(
        storage,
        Arc::new(hyrax_fs::collation::EnglishCollation),
        Arc::new(FixedClock(TEST_TIME)),
    )
    .expect("mount")
}

/// A clock is part of every server the tests build; kept separate for
/// tests that assemble their own server.
pub fn fixed_clock() -> Arc<dyn Clock + Send + Sync> {
    Arc::new(FixedClock(TEST_TIME))
}

pub fn peek_u16(disk: &RamDisk, offset: usize) -> u16 {
    let mut buffer = [0; 2];
    disk.peek(offset as u64, &mut buffer);
    u16::from_le_bytes(buffer)
}

pub fn peek_u32(disk: &RamDisk, offset: usize) -> u32 {
    let mut buffer = [0; 4];
    disk.peek(offset as u64, &mut buffer);
    u32::from_le_bytes(buffer)
}

/// Raw 32-byte records of a directory area, up to the first empty marker.
pub fn raw_records(disk: &RamDisk, offset: usize, count: usize) -> Vec<[u8; 32]> {
    let mut records = Vec::new();
    for at in 0..count {
        let mut record = [0; 32];
        disk.peek((offset + at * 32) as u64, &mut record);
        if record[0] == 0 {
            break;
        }
        records.push(record);
    }
    records
}
