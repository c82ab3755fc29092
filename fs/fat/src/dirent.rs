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

use hyrax_fs::time::Timestamp;
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout,
};

pub(crate) const ATTR_READ_ONLY: u8 = 0x01;
pub(crate) const ATTR_VOLUME_ID: u8 = 0x08;
pub(crate) const ATTR_DIRECTORY: u8 = 0x10;
pub(crate) const ATTR_ARCHIVE: u8 = 0x20;
/// Read-only, hidden, system and volume-id together mark a long-name slot.
pub(crate) const ATTR_LFN: u8 = 0x0F;

pub(crate) const DELETE_ENTRY_MARK: u8 = 0xE5;
pub(crate) const EMPTY_ENTRY_MARK: u8 = 0x00;

/// Case flags stored in the reserved byte of a directory entry: render the
/// main name and/or the extension lower case. `CASE_MIXED` is internal and
/// never hits the disk; it forces a long-name chain instead.
pub(crate) const CASE_MIXED: u8 = 0x01;
pub(crate) const CASE_NAME_LOWER: u8 = 0x08;
pub(crate) const CASE_EXT_LOWER: u8 = 0x10;

pub(crate) const FAT_MAIN_NAME_LEN: usize = 8;
pub(crate) const FAT_EXTEND_NAME_LEN: usize = 3;
pub(crate) const FAT_NAME_LEN: usize = FAT_MAIN_NAME_LEN + FAT_EXTEND_NAME_LEN;

pub(crate) const FAT_LFN_LAST: u8 = 0x40;
pub(crate) const MAX_LFN_ENTRIES: usize = 20;
pub(crate) const LFN_CHAR1_LEN: usize = 5;
pub(crate) const LFN_CHAR2_LEN: usize = 6;
pub(crate) const LFN_CHAR3_LEN: usize = 2;
pub(crate) const LFN_CHAR_TOTAL: usize = LFN_CHAR1_LEN + LFN_CHAR2_LEN + LFN_CHAR3_LEN;

/// Number of long-name slots needed for a name of `len` UTF-16 units.
pub(crate) fn lfn_entry_count(len: usize) -> usize {
    (len + LFN_CHAR_TOTAL - 1) / LFN_CHAR_TOTAL
}

/// Everything from the case flag on is metadata shared by a file and the
/// dot entries referring to it, copied as one block.
pub(crate) const ENTRY_INFO_OFFSET: usize = 13;

pub(crate) const FAT_MAX_YEAR_FROM_1980: u16 = 0x7F;

/// The 32-byte directory record.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct DirEntry {
    /// "Short" file name limited to 11 characters (8.3 format).
    pub file_name: [u8; FAT_NAME_LEN],
    pub attributes: u8,
    /// Case flag, see `CASE_NAME_LOWER`/`CASE_EXT_LOWER`.
    pub case_flag: u8,
    /// Creation time, tenths of a second component. Not interpreted.
    pub create_millisecond: u8,
    pub create_time: U16,
    pub create_date: U16,
    pub last_access_date: U16,
    /// High word of the first cluster. Only meaningful on FAT32; zeroed in
    /// memory when loading from FAT12/FAT16 media.
    pub cluster_high: U16,
    pub modification_time: U16,
    pub modification_date: U16,
    pub cluster_low: U16,
    pub file_size: U32,
}

impl DirEntry {
    pub fn new_zeroed_with_blank_name() -> Self {
        let mut entry = Self::new_zeroed();
        entry.file_name = [b' '; FAT_NAME_LEN];
        entry
    }

    pub fn cluster(&self) -> u32 {
        (self.cluster_high.get() as u32) << 16 | self.cluster_low.get() as u32
    }

    pub fn set_cluster(&mut self, cluster: u32) {
        self.cluster_high = U16::new((cluster >> 16) as u16);
        self.cluster_low = U16::new(cluster as u16);
    }
}

/// A long-name slot, overlaying the 32-byte record. The name parts are
/// byte-aligned on disk, which the little-endian wrapper types preserve.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct LfnEntry {
    /// Slot order within the chain, with `FAT_LFN_LAST` set on the highest
    /// ordinal (the slot physically preceding the 8.3 record).
    pub ordinal: u8,
    pub name1: [U16; LFN_CHAR1_LEN],
    /// Must be `ATTR_LFN`.
    pub attributes: u8,
    /// Must be zero.
    pub entry_type: u8,
    /// Checksum of the 8.3 name of the record the chain belongs to.
    pub checksum: u8,
    pub name2: [U16; LFN_CHAR2_LEN],
    pub must_be_zero: U16,
    pub name3: [U16; LFN_CHAR3_LEN],
}

impl LfnEntry {
    /// The 13 UTF-16 units carried by this slot.
    pub fn chars(&self) -> [u16; LFN_CHAR_TOTAL] {
        let mut chars = [0; LFN_CHAR_TOTAL];
        for (dst, src) in chars.iter_mut().zip(
            self.name1
                .iter()
                .chain(self.name2.iter())
                .chain(self.name3.iter()),
        ) {
            *dst = src.get();
        }
        chars
    }

    pub fn set_chars(&mut self, chars: &[u16; LFN_CHAR_TOTAL]) {
        for (dst, src) in self
            .name1
            .iter_mut()
            .chain(self.name2.iter_mut())
            .chain(self.name3.iter_mut())
            .zip(chars.iter())
        {
            *dst = U16::new(*src);
        }
    }
}

/// Rotate-right-then-add over the 11 name bytes, as stored in every
/// long-name slot of the record's chain.
pub(crate) fn short_name_checksum(file_name: &[u8; FAT_NAME_LEN]) -> u8 {
    file_name
        .iter()
        .fold(0u8, |sum, &c| sum.rotate_right(1).wrapping_add(c))
}

/// DOS-packed date: day 0..5, month 5..9, year-since-1980 9..16.
pub(crate) fn pack_date(time: &Timestamp) -> u16 {
    let mut year = time.year.saturating_sub(1980);
    if year > FAT_MAX_YEAR_FROM_1980 {
        year = FAT_MAX_YEAR_FROM_1980;
    }
    (time.day as u16 & 0x1F) | ((time.month as u16 & 0x0F) << 5) | (year << 9)
}

/// DOS-packed time: double-seconds 0..5, minute 5..11, hour 11..16.
pub(crate) fn pack_time(time: &Timestamp) -> u16 {
    (time.second as u16 / 2 & 0x1F) | ((time.minute as u16 & 0x3F) << 5) | ((time.hour as u16 & 0x1F) << 11)
}

pub(crate) fn unpack_date_time(date: u16, time: u16) -> Timestamp {
    Timestamp {
        year: (date >> 9) + 1980,
        month: (date >> 5 & 0x0F) as u8,
        day: (date & 0x1F) as u8,
        hour: (time >> 11) as u8,
        minute: (time >> 5 & 0x3F) as u8,
        second: ((time & 0x1F) * 2) as u8,
    }
}

pub(crate) fn unpack_date(date: u16) -> Timestamp {
    unpack_date_time(date, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layouts_are_32_bytes() {
        assert_eq!(size_of::<DirEntry>(), 32);
        assert_eq!(size_of::<LfnEntry>(), 32);
    }

    #[test]
    fn checksum_matches_reference() {
        assert_eq!(short_name_checksum(b"FILENAMEEXT"), 0xF6);
        assert_eq!(short_name_checksum(b"A       TXT"), 0x5D);
        assert_eq!(short_name_checksum(b"KERNEL  BIN"), 0xDA);
    }

    #[test]
    fn date_time_round_trip() {
        let time = Timestamp {
            year: 2024,
            month: 8,
            day: 13,
            hour: 17,
            minute: 42,
            second: 36,
        };
        assert_eq!(unpack_date_time(pack_date(&time), pack_time(&time)), time);
    }

    #[test]
    fn pack_date_clamps_years() {
        let time = Timestamp {
            year: 2200,
            month: 1,
            day: 1,
            ..Timestamp::ZERO
        };
        assert_eq!(pack_date(&time) >> 9, FAT_MAX_YEAR_FROM_1980);

        let time = Timestamp {
            year: 1970,
            month: 1,
            day: 1,
            ..Timestamp::ZERO
        };
        assert_eq!(pack_date(&time) >> 9, 0);
    }

    #[test]
    fn odd_seconds_round_down() {
        let time = Timestamp {
            year: 1990,
            month: 1,
            day: 1,
            second: 5,
            ..Timestamp::ZERO
        };
        assert_eq!(unpack_date_time(pack_date(&time), pack_time(&time)).second, 4);
    }

    #[test]
    fn lfn_chars_round_trip() {
        let mut entry = LfnEntry::new_zeroed();
        let mut chars = [0xFFFF; LFN_CHAR_TOTAL];
        for (i, c) in "hello.txt\0".encode_utf16().enumerate() {
            chars[i] = c;
        }
        entry.set_chars(&chars);
        assert_eq!(entry.chars(), chars);
    }
}
