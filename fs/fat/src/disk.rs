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

use hyrax_ds::DataStorage;
use hyrax_fs::{Error, FsError, Result};
use log::{debug, error};

use crate::volume::{FatType, Volume};

// FAT cache pages are 8 KiB on FAT12 volumes and 32 KiB otherwise, data
// cache pages 8 KiB and 64 KiB. The FAT cache is a single group on FAT12
// and 16 groups otherwise, the data cache always 64 groups.
pub(crate) const FAT_CACHE_PAGE_MIN_ALIGNMENT: u8 = 13;
pub(crate) const FAT_CACHE_PAGE_MAX_ALIGNMENT: u8 = 15;
pub(crate) const DATA_CACHE_PAGE_MIN_ALIGNMENT: u8 = 13;
pub(crate) const DATA_CACHE_PAGE_MAX_ALIGNMENT: u8 = 16;
pub(crate) const DATA_CACHE_GROUP_COUNT: usize = 64;
pub(crate) const FAT_CACHE_GROUP_MIN_COUNT: usize = 1;
pub(crate) const FAT_CACHE_GROUP_MAX_COUNT: usize = 16;

pub(crate) const CACHE_FAT: usize = 0;
pub(crate) const CACHE_DATA: usize = 1;

/// How a transfer routes: raw transfers go to the device directly, the
/// others through the corresponding cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IoArea {
    Raw,
    Fat,
    Data,
}

#[derive(Clone, Copy)]
struct CacheTag {
    page_no: u64,
    /// Valid bytes in this page; zero marks the tag empty.
    real_size: usize,
    dirty: bool,
}

pub(crate) struct DiskCache {
    base_address: u64,
    limit_address: u64,
    page_alignment: u8,
    group_mask: u64,
    dirty: bool,
    tags: Vec<CacheTag>,
    pages: Vec<u8>,
}

impl DiskCache {
    pub fn new(base_address: u64, limit_address: u64, page_alignment: u8, group_count: usize) -> Self {
        Self {
            base_address,
            limit_address,
            page_alignment,
            group_mask: group_count as u64 - 1,
            dirty: false,
            tags: vec![
                CacheTag {
                    page_no: 0,
                    real_size: 0,
                    dirty: false
                };
                group_count
            ],
            pages: vec![0; group_count << page_alignment],
        }
    }

    fn page_size(&self) -> usize {
        1 << self.page_alignment
    }

    fn page_range(&self, group_no: usize) -> std::ops::Range<usize> {
        let page_size = self.page_size();
        group_no * page_size..(group_no + 1) * page_size
    }
}

impl<DS: DataStorage> Volume<DS> {
    /// All disk traffic of the driver below the boot-sector read funnels
    /// through here. Failures latch the volume's disk-error flag.
    pub(crate) fn disk_read(&mut self, area: IoArea, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let status = self.disk_read_inner(area, offset, buffer);
        if let Err(error) = status {
            self.disk_error = true;
            error!("Disk read failed: {error}");
        }
        status
    }

    pub(crate) fn disk_write(&mut self, area: IoArea, offset: u64, buffer: &[u8]) -> Result<()> {
        let status = self.disk_write_inner(area, offset, buffer);
        if let Err(error) = status {
            self.disk_error = true;
            error!("Disk write failed: {error}");
        }
        status
    }

    fn disk_read_inner(&mut self, area: IoArea, offset: u64, buffer: &mut [u8]) -> Result<()> {
        if offset + buffer.len() as u64 > self.volume_size {
            return Err(Error::Fs(FsError::Inconsistent));
        }
        match area {
            IoArea::Raw => self.storage.read(offset, buffer),
            IoArea::Fat | IoArea::Data => self.cache_read(area, offset, buffer),
        }
    }

    fn disk_write_inner(&mut self, area: IoArea, offset: u64, buffer: &[u8]) -> Result<()> {
        if offset + buffer.len() as u64 > self.volume_size {
            return Err(Error::Fs(FsError::Inconsistent));
        }
        match area {
            IoArea::Raw => self.storage.write(offset, buffer),
            IoArea::Fat | IoArea::Data => self.cache_write(area, offset, buffer),
        }
    }

    fn cache_of(area: IoArea) -> usize {
        match area {
            IoArea::Fat => CACHE_FAT,
            _ => CACHE_DATA,
        }
    }

    /// Splits `[offset, offset + len)` into an under-run fragment, an
    /// aligned body and an over-run fragment. The fragments go through the
    /// cache; the body bypasses it (data cache only) and is then
    /// reconciled with any overlapping cached pages.
    fn cache_read(&mut self, area: IoArea, offset: u64, mut buffer: &mut [u8]) -> Result<()> {
        let which = Self::cache_of(area);
        let cache = &self.caches[which];
        let page_alignment = cache.page_alignment;
        let page_size = 1usize << page_alignment;
        let entry_pos = offset - cache.base_address;
        let mut page_no = entry_pos >> page_alignment;
        let under_run = (entry_pos & (page_size as u64 - 1)) as usize;

        if under_run > 0 {
            let length = (page_size - under_run).min(buffer.len());
            self.access_unaligned_read(which, page_no, under_run, &mut buffer[..length])?;
            buffer = &mut buffer[length..];
            page_no += 1;
        }

        let aligned_page_count = buffer.len() >> page_alignment;
        let over_run_page_no = page_no + aligned_page_count as u64;
        if aligned_page_count > 0 {
            // The FAT cache never sees aligned bulk transfers, FAT entries
            // are at most four bytes.
            debug_assert_eq!(which, CACHE_DATA);
            let aligned_size = aligned_page_count << page_alignment;
            let entry_pos = self.caches[which].base_address + (page_no << page_alignment);
            self.storage.read(entry_pos, &mut buffer[..aligned_size])?;
            self.snoop_read_range(which, page_no, over_run_page_no, &mut buffer[..aligned_size]);
            buffer = &mut buffer[aligned_size..];
        }

        if !buffer.is_empty() {
            self.access_unaligned_read(which, over_run_page_no, 0, buffer)?;
        }
        Ok(())
    }

    fn cache_write(&mut self, area: IoArea, offset: u64, mut buffer: &[u8]) -> Result<()> {
        let which = Self::cache_of(area);
        let cache = &self.caches[which];
        let page_alignment = cache.page_alignment;
        let page_size = 1usize << page_alignment;
        let entry_pos = offset - cache.base_address;
        let mut page_no = entry_pos >> page_alignment;
        let under_run = (entry_pos & (page_size as u64 - 1)) as usize;

        if under_run > 0 {
            let length = (page_size - under_run).min(buffer.len());
            self.access_unaligned_write(which, page_no, under_run, &buffer[..length])?;
            buffer = &buffer[length..];
            page_no += 1;
        }

        let aligned_page_count = buffer.len() >> page_alignment;
        let over_run_page_no = page_no + aligned_page_count as u64;
        if aligned_page_count > 0 {
            debug_assert_eq!(which, CACHE_DATA);
            let aligned_size = aligned_page_count << page_alignment;
            let entry_pos = self.caches[which].base_address + (page_no << page_alignment);
            self.storage.write(entry_pos, &buffer[..aligned_size])?;
            // Whatever the cache holds for this range is now stale.
            self.invalidate_range(which, page_no, over_run_page_no);
            buffer = &buffer[aligned_size..];
        }

        if !buffer.is_empty() {
            self.access_unaligned_write(which, over_run_page_no, 0, buffer)?;
        }
        Ok(())
    }

    /// A bulk read bypassed the cache; overlay the bytes of any overlapping
    /// dirty page so the caller sees its own uncommitted writes.
    fn snoop_read_range(&mut self, which: usize, start_page_no: u64, end_page_no: u64, buffer: &mut [u8]) {
        let cache = &self.caches[which];
        let page_alignment = cache.page_alignment;
        let page_size = cache.page_size();
        for page_no in start_page_no..end_page_no {
            let group_no = (page_no & cache.group_mask) as usize;
            let tag = &cache.tags[group_no];
            if tag.real_size > 0 && tag.page_no == page_no && tag.dirty {
                let destination = ((page_no - start_page_no) << page_alignment) as usize;
                buffer[destination..destination + page_size]
                    .copy_from_slice(&cache.pages[cache.page_range(group_no)]);
            }
        }
    }

    fn invalidate_range(&mut self, which: usize, start_page_no: u64, end_page_no: u64) {
        let cache = &mut self.caches[which];
        for page_no in start_page_no..end_page_no {
            let group_no = (page_no & cache.group_mask) as usize;
            let tag = &mut cache.tags[group_no];
            if tag.real_size > 0 && tag.page_no == page_no {
                tag.real_size = 0;
            }
        }
    }

    fn access_unaligned_read(
        &mut self,
        which: usize,
        page_no: u64,
        offset: usize,
        buffer: &mut [u8],
    ) -> Result<()> {
        let group_no = self.get_cache_page(which, page_no)?;
        let cache = &self.caches[which];
        let page = &cache.pages[cache.page_range(group_no)];
        buffer.copy_from_slice(&page[offset..offset + buffer.len()]);
        Ok(())
    }

    fn access_unaligned_write(
        &mut self,
        which: usize,
        page_no: u64,
        offset: usize,
        buffer: &[u8],
    ) -> Result<()> {
        let group_no = self.get_cache_page(which, page_no)?;
        let cache = &mut self.caches[which];
        let range = cache.page_range(group_no);
        cache.pages[range][offset..offset + buffer.len()].copy_from_slice(buffer);
        cache.tags[group_no].dirty = true;
        cache.dirty = true;
        Ok(())
    }

    /// Maps `page_no` into its group, writing back whichever dirty page
    /// currently occupies the slot. Returns the group index.
    fn get_cache_page(&mut self, which: usize, page_no: u64) -> Result<usize> {
        let cache = &self.caches[which];
        let group_no = (page_no & cache.group_mask) as usize;
        let tag = &cache.tags[group_no];
        if tag.real_size > 0 && tag.page_no == page_no {
            return Ok(group_no);
        }

        if tag.real_size > 0 && tag.dirty {
            self.exchange_cache_page_write(which, group_no)?;
        }
        self.caches[which].tags[group_no].page_no = page_no;
        self.exchange_cache_page_read(which, group_no)?;
        Ok(group_no)
    }

    fn exchange_cache_page_read(&mut self, which: usize, group_no: usize) -> Result<()> {
        let cache = &mut self.caches[which];
        let entry_pos = cache.base_address + (cache.tags[group_no].page_no << cache.page_alignment);
        let mut real_size = cache.page_size();
        let max_size = cache.limit_address - entry_pos;
        if (max_size as usize) < real_size {
            debug!("Cache page clamped at the area limit");
            real_size = max_size as usize;
        }

        let range = cache.page_range(group_no);
        let status = self
            .storage
            .read(entry_pos, &mut cache.pages[range][..real_size]);
        if let Err(error) = status {
            cache.tags[group_no].real_size = 0;
            return Err(error);
        }
        cache.tags[group_no].dirty = false;
        cache.tags[group_no].real_size = real_size;
        Ok(())
    }

    /// Writes a page back. A FAT page fans out to every FAT copy so they
    /// stay byte-identical.
    fn exchange_cache_page_write(&mut self, which: usize, group_no: usize) -> Result<()> {
        let cache = &self.caches[which];
        let real_size = cache.tags[group_no].real_size;
        let mut entry_pos = cache.base_address + (cache.tags[group_no].page_no << cache.page_alignment);
        let page = &cache.pages[cache.page_range(group_no)][..real_size];

        let write_count = if which == CACHE_FAT { self.num_fats } else { 1 };
        for _ in 0..write_count {
            self.storage.write(entry_pos, page)?;
            entry_pos += self.fat_size;
        }

        self.caches[which].tags[group_no].dirty = false;
        Ok(())
    }

    /// Writes every dirty page of both caches back and flushes the device.
    pub(crate) fn flush_disk_cache(&mut self) -> Result<()> {
        for which in [CACHE_FAT, CACHE_DATA] {
            if !self.caches[which].dirty {
                continue;
            }
            for group_no in 0..self.caches[which].tags.len() {
                let tag = &self.caches[which].tags[group_no];
                if tag.real_size > 0 && tag.dirty {
                    if let Err(error) = self.exchange_cache_page_write(which, group_no) {
                        self.disk_error = true;
                        error!("Cache write-back failed: {error}");
                        return Err(error);
                    }
                }
            }
            self.caches[which].dirty = false;
        }
        self.storage.flush()
    }

    pub(crate) fn init_disk_cache(&mut self) {
        let (fat_group_count, fat_alignment, data_alignment) = if self.fat_type == FatType::Fat12 {
            (
                FAT_CACHE_GROUP_MIN_COUNT,
                FAT_CACHE_PAGE_MIN_ALIGNMENT,
                DATA_CACHE_PAGE_MIN_ALIGNMENT,
            )
        } else {
            (
                FAT_CACHE_GROUP_MAX_COUNT,
                FAT_CACHE_PAGE_MAX_ALIGNMENT,
                DATA_CACHE_PAGE_MAX_ALIGNMENT,
            )
        };
        self.caches = [
            DiskCache::new(
                self.fat_pos,
                self.fat_pos + self.fat_size,
                fat_alignment,
                fat_group_count,
            ),
            DiskCache::new(
                self.root_pos,
                self.volume_size,
                data_alignment,
                DATA_CACHE_GROUP_COUNT,
            ),
        ];
    }
}
