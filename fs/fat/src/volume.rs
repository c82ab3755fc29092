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

use std::sync::Arc;

use hyrax_ds::DataStorage;
use hyrax_fs::{
    collation::UnicodeCollation,
    time::Clock,
    Error, FileId, FsError, IoError, Result,
};
use log::error;
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout,
};

use crate::{
    arena::Arena,
    dir::{DirEnt, ODir},
    dirent::{DirEntry, ATTR_DIRECTORY},
    disk::{DiskCache, IoArea},
    file::{IFile, IFileId, OFile, OFileId},
    table::{
        FAT16_DIRTY_MASK, FAT32_DIRTY_MASK, MAX_FAT12_CLUSTER, MAX_FAT16_CLUSTER, MIN_CLUSTER,
    },
};

// Sector sizes range from 512 bytes to 4 KiB, clusters up to 128 sectors.
const MIN_BLOCK_ALIGNMENT: u32 = 9;
const MAX_BLOCK_ALIGNMENT: u32 = 12;
const MAX_SECTORS_PER_CLUSTER_ALIGNMENT: u32 = 7;

const FAT_INFO_SIGNATURE: u32 = 0x41615252;
const FAT_INFO_BEGIN_SIGNATURE: u32 = 0x61417272;
const FAT_INFO_END_SIGNATURE: u32 = 0xAA550000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

/// Boot sector in its FAT32 shape; the FAT12/16 extension differs only in
/// fields this driver does not interpret, so one layout serves all three.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
struct BootSector {
    /// Jump instruction to boot code, 0xEB 0x?? 0x90 or 0xE9 0x?? 0x??.
    bs_jmpboot: [u8; 3],
    bs_oemname: [u8; 8],

    /// Count of bytes per sector: 512, 1024, 2048 or 4096.
    bpb_bytspersec: U16,
    /// Sectors per allocation unit, a power of 2 up to 128.
    bpb_secperclus: u8,
    /// Sectors in the reserved region; must not be 0.
    bpb_rsvdseccnt: U16,
    /// Count of FATs on the volume, typically 2.
    bpb_numfats: u8,
    /// FAT12/16: 32-byte entries in the root directory. 0 on FAT32.
    bpb_rootentcnt: U16,
    /// 16-bit total sector count; 0 means use the 32-bit count.
    bpb_totsec16: U16,
    /// Media descriptor: 0xF0, or 0xF8 through 0xFF.
    bpb_media: u8,
    /// FAT12/16: sectors per FAT. 0 on FAT32.
    bpb_fatsz16: U16,

    bpb_secpertrk: U16,
    bpb_numheads: U16,
    bpb_hiddsec: U32,

    /// 32-bit total sector count, used when the 16-bit count is 0.
    bpb_totsec32: U32,

    // The FAT32 extension.
    /// FAT32: sectors per FAT.
    bpb_fatsz32: U32,
    /// FAT32: bit 7 set disables runtime FAT mirroring.
    bpb_extflags: U16,
    /// FAT32: version, must be 0.
    bpb_fsver: U16,
    /// FAT32: first cluster of the root directory.
    bpb_rootclus: U32,
    /// FAT32: sector number of the FS info sector, usually 1.
    bpb_fsinfo: U16,
    bpb_bkbootsec: U16,
    bpb_reserved: [u8; 12],

    bs_drvnum: u8,
    bs_reserved1: u8,
    bs_bootsig: u8,
    bs_volid: U32,
    bs_vollab: [u8; 11],
    bs_filsystype: [u8; 8],

    bs_boot: [u8; 420],
    /// 0x55 0xAA.
    signature_word: [u8; 2],
}

/// FAT32 FS info sector, caching the free-cluster count and a search hint.
#[repr(C)]
#[derive(Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct FsInfoSector {
    pub signature: U32,
    pub extra_boot_code: [u8; 480],
    pub info_begin_signature: U32,
    pub free_cluster_count: U32,
    pub next_free_cluster: U32,
    pub reserved: [u8; 12],
    pub info_end_signature: U32,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FreeInfo {
    pub cluster_count: u32,
    pub next_cluster: u32,
}

pub(crate) struct Volume<DS: DataStorage> {
    pub storage: DS,
    pub collation: Arc<dyn UnicodeCollation + Send + Sync>,
    pub clock: Arc<dyn Clock + Send + Sync>,

    pub valid: bool,
    pub disk_error: bool,
    pub read_only: bool,

    // Geometry, fixed after mount.
    pub volume_size: u64,
    pub fat_pos: u64,
    pub root_pos: u64,
    pub first_cluster_pos: u64,
    pub fat_size: u64,
    pub max_cluster: u32,
    pub cluster_size: u32,
    pub cluster_alignment: u8,
    pub fat_type: FatType,
    pub num_fats: u32,
    pub root_entries: u32,
    pub root_cluster: u32,

    // Free-cluster bookkeeping, backed by the FAT32 FS info sector.
    pub fat_info_sector: FsInfoSector,
    pub free_info: FreeInfo,
    pub free_info_pos: u64,
    pub free_info_valid: bool,

    // Volume-dirty flag handling.
    pub fat_dirty: bool,
    pub dirty_value: u32,
    pub not_dirty_value: u32,

    /// Synthetic directory entry backing the root.
    pub root_dir_ent: DirEnt,
    pub root: Option<OFileId>,

    pub ofiles: Arena<OFile>,
    pub ifiles: Arena<IFile>,
    /// Open files whose reference count may have dropped to zero.
    pub check_ref: Vec<OFileId>,
    /// Parsed directories of closed directory files, most recent first.
    pub dir_cache: Vec<Box<ODir>>,

    pub caches: [DiskCache; 2],
}

impl<DS: DataStorage> Volume<DS> {
    /// Detects a FAT file system on the storage and derives the volume
    /// geometry from its BPB.
    pub(crate) fn mount(
        storage: DS,
        collation: Arc<dyn UnicodeCollation + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self> {
        let mut boot_sector = BootSector::new_zeroed();
        storage.read(0, boot_sector.as_mut_bytes())?;

        let mut sectors = boot_sector.bpb_totsec16.get() as u64;
        if sectors == 0 {
            sectors = boot_sector.bpb_totsec32.get() as u64;
        }

        let mut fat_type = None;
        let mut sectors_per_fat = boot_sector.bpb_fatsz16.get() as u64;
        if sectors_per_fat == 0 {
            sectors_per_fat = boot_sector.bpb_fatsz32.get() as u64;
            fat_type = Some(FatType::Fat32);
        }

        if boot_sector.bpb_rsvdseccnt.get() == 0 || boot_sector.bpb_numfats == 0 || sectors == 0 {
            return Err(Error::Fs(FsError::Unsupported));
        }

        let sector_size = boot_sector.bpb_bytspersec.get() as u32;
        if !sector_size.is_power_of_two() {
            return Err(Error::Fs(FsError::Unsupported));
        }
        let block_alignment = sector_size.ilog2();
        if !(MIN_BLOCK_ALIGNMENT..=MAX_BLOCK_ALIGNMENT).contains(&block_alignment) {
            error!("Sector size ({sector_size}) shall be within [512, 4096]");
            return Err(Error::Fs(FsError::Unsupported));
        }

        let sectors_per_cluster = boot_sector.bpb_secperclus as u32;
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(Error::Fs(FsError::Unsupported));
        }
        let sectors_per_cluster_alignment = sectors_per_cluster.ilog2();
        if sectors_per_cluster_alignment > MAX_SECTORS_PER_CLUSTER_ALIGNMENT {
            error!("Sectors per cluster ({sectors_per_cluster}) shall be at most 128");
            return Err(Error::Fs(FsError::Unsupported));
        }

        let media = boot_sector.bpb_media;
        if media <= 0xF7 && media != 0xF0 && media != 0x00 && media != 0x01 {
            return Err(Error::Fs(FsError::Unsupported));
        }

        let mut root_entries = 0;
        let mut root_cluster = 0;
        if fat_type != Some(FatType::Fat32) {
            if boot_sector.bpb_rootentcnt.get() == 0 {
                return Err(Error::Fs(FsError::Unsupported));
            }
            root_entries = boot_sector.bpb_rootentcnt.get() as u32;
        } else {
            // Refuse mirror-disabled and versioned FAT32 volumes.
            if sectors_per_fat == 0
                || boot_sector.bpb_fsver.get() != 0
                || boot_sector.bpb_extflags.get() & 0x80 != 0
            {
                return Err(Error::Fs(FsError::Unsupported));
            }
            root_cluster = boot_sector.bpb_rootclus.get();
        }

        let num_fats = boot_sector.bpb_numfats as u32;
        let root_dir_sectors = (root_entries as u64 * size_of::<DirEntry>() as u64)
            .div_ceil(sector_size as u64);

        let fat_lba = boot_sector.bpb_rsvdseccnt.get() as u64;
        let root_lba = num_fats as u64 * sectors_per_fat + fat_lba;
        let first_cluster_lba = root_lba + root_dir_sectors;
        if first_cluster_lba >= sectors {
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let cluster_alignment = (block_alignment + sectors_per_cluster_alignment) as u8;
        let max_cluster = ((sectors - first_cluster_lba) >> sectors_per_cluster_alignment) as u32;

        // Narrow the width from the cluster count when the BPB did not
        // already pin FAT32.
        let fat_type = match fat_type {
            None => {
                if max_cluster >= MAX_FAT16_CLUSTER {
                    return Err(Error::Fs(FsError::Inconsistent));
                }
                if max_cluster < MAX_FAT12_CLUSTER {
                    FatType::Fat12
                } else {
                    FatType::Fat16
                }
            }
            Some(fat_type) => {
                if max_cluster < MAX_FAT16_CLUSTER {
                    return Err(Error::Fs(FsError::Inconsistent));
                }
                fat_type
            }
        };
        let dirty_mask = match fat_type {
            FatType::Fat32 => FAT32_DIRTY_MASK,
            _ => FAT16_DIRTY_MASK,
        };

        let mut root_dir_ent = DirEnt::new(String::new());
        root_dir_ent.entry.attributes = ATTR_DIRECTORY;

        let mut volume = Self {
            read_only: storage.read_only(),
            storage,
            collation,
            clock,
            valid: true,
            disk_error: false,
            volume_size: sectors << block_alignment,
            fat_pos: fat_lba << block_alignment,
            root_pos: root_lba << block_alignment,
            first_cluster_pos: first_cluster_lba << block_alignment,
            fat_size: sectors_per_fat << block_alignment,
            max_cluster,
            cluster_size: 1 << cluster_alignment,
            cluster_alignment,
            fat_type,
            num_fats,
            root_entries,
            root_cluster,
            fat_info_sector: FsInfoSector::new_zeroed(),
            free_info: FreeInfo::default(),
            free_info_pos: 0,
            free_info_valid: false,
            fat_dirty: false,
            dirty_value: 0,
            not_dirty_value: 0,
            root_dir_ent,
            root: None,
            ofiles: Arena::new(),
            ifiles: Arena::new(),
            check_ref: Vec::new(),
            dir_cache: Vec::new(),
            caches: [DiskCache::new(0, 0, 0, 1), DiskCache::new(0, 0, 0, 1)],
        };
        volume.init_disk_cache();

        // Sample the dirty flag; the initial value doubles as the
        // not-dirty value in case the volume is dirty already.
        if fat_type != FatType::Fat12 {
            volume.not_dirty_value = volume.read_volume_dirty_raw()?;
            volume.dirty_value = volume.not_dirty_value & dirty_mask;
        }

        // The free-cluster hint only exists on FAT32.
        if fat_type == FatType::Fat32 {
            let free_info_pos = boot_sector.bpb_fsinfo.get() as u64 * sector_size as u64;
            volume.free_info_pos = free_info_pos;
            if free_info_pos != 0 {
                let mut fat_info_sector = FsInfoSector::new_zeroed();
                if volume
                    .disk_read(IoArea::Raw, free_info_pos, fat_info_sector.as_mut_bytes())
                    .is_ok()
                    && fat_info_sector.signature.get() == FAT_INFO_SIGNATURE
                    && fat_info_sector.info_begin_signature.get() == FAT_INFO_BEGIN_SIGNATURE
                    && fat_info_sector.info_end_signature.get() == FAT_INFO_END_SIGNATURE
                    && fat_info_sector.free_cluster_count.get() <= max_cluster
                {
                    volume.free_info.cluster_count = fat_info_sector.free_cluster_count.get();
                    volume.free_info.next_cluster = fat_info_sector.next_free_cluster.get();
                    volume.fat_info_sector = fat_info_sector;
                    volume.free_info_valid = true;
                }
            }
        }

        if volume.free_info.next_cluster < MIN_CLUSTER
            || volume.free_info.next_cluster > max_cluster + 1
        {
            volume.free_info.next_cluster = MIN_CLUSTER;
        }

        Ok(volume)
    }

    pub(crate) fn ifile_id(&self, file: FileId) -> Result<IFileId> {
        let id = file.0 as usize;
        if self.ifiles.get(id).is_some() {
            Ok(id)
        } else {
            Err(Error::Fs(FsError::InvalidParameter))
        }
    }

    /// Writes the FS info sector back with the current free-cluster info.
    pub(crate) fn write_free_info(&mut self) -> Result<()> {
        self.fat_info_sector.signature = U32::new(FAT_INFO_SIGNATURE);
        self.fat_info_sector.info_begin_signature = U32::new(FAT_INFO_BEGIN_SIGNATURE);
        self.fat_info_sector.info_end_signature = U32::new(FAT_INFO_END_SIGNATURE);
        self.fat_info_sector.free_cluster_count = U32::new(self.free_info.cluster_count);
        self.fat_info_sector.next_free_cluster = U32::new(self.free_info.next_cluster);
        let sector = self.fat_info_sector.clone();
        self.disk_write(IoArea::Raw, self.free_info_pos, sector.as_bytes())
    }

    /// Tears the volume down: remaining open files are latched with a
    /// media-appropriate permanent error, the reference sweep runs, the
    /// free-cluster hint and the dirty flag are written back (the former
    /// best effort) and both caches are flushed.
    pub(crate) fn unmount(&mut self) -> Result<()> {
        if let Some(root) = self.root {
            let error = if self.disk_error {
                Error::Io(IoError::NoMedia)
            } else {
                Error::Io(IoError::MediaChanged)
            };
            self.set_volume_error(root, error);
        }
        self.check_volume_ref();

        if self.free_info_valid && self.fat_dirty && self.free_info_pos != 0 {
            let _ = self.write_free_info();
        }

        let mut status = Ok(());
        if self.fat_dirty && self.fat_type != FatType::Fat12 && !self.disk_error {
            self.fat_dirty = false;
            let not_dirty_value = self.not_dirty_value;
            status = self.write_volume_dirty(not_dirty_value);
        }

        let flushed = self.flush_disk_cache();
        self.valid = false;
        self.cleanup_odir_cache();
        status.and(flushed)
    }
}
