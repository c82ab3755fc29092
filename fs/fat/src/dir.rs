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

use std::cmp::Ordering;

use hyrax_ds::DataStorage;
use hyrax_fs::{Error, FileAttributes, FileInfo, FsError, Result};
use log::debug;
use zerocopy::{little_endian::U16, transmute, FromZeros, IntoBytes};

use crate::{
    arena::Arena,
    dirent::{
        lfn_entry_count, pack_date, pack_time, short_name_checksum, unpack_date, unpack_date_time,
        DirEntry, LfnEntry, ATTR_ARCHIVE, ATTR_DIRECTORY, ATTR_LFN, ATTR_VOLUME_ID,
        DELETE_ENTRY_MARK, EMPTY_ENTRY_MARK, ENTRY_INFO_OFFSET, FAT_LFN_LAST, FAT_NAME_LEN,
        LFN_CHAR_TOTAL, MAX_LFN_ENTRIES,
    },
    file::{OFile, OFileId},
    hash::HASH_TABLE_SIZE,
    name,
    volume::{FatType, Volume},
};

/// Hard cap of 8.3 slots in one directory; the fixed root is capped by its
/// BPB entry count instead.
pub(crate) const MAX_DIRENTRY_COUNT: u32 = 0xFFFF;

pub(crate) type DirEntId = usize;

/// One logical directory entry: the 8.3 record plus the cooked long name.
pub(crate) struct DirEnt {
    pub file_string: String,
    pub entry: DirEntry,
    /// Index of the 8.3 record within the parent directory file.
    pub entry_pos: u16,
    /// 1 plus the number of preceding long-name slots.
    pub entry_count: u8,
    pub invalid: bool,
    /// The open file currently backed by this entry, if any.
    pub ofile: Option<OFileId>,
    pub short_name_forward_link: Option<DirEntId>,
    pub long_name_forward_link: Option<DirEntId>,
    pub previous: Option<DirEntId>,
    pub next: Option<DirEntId>,
}

impl DirEnt {
    pub fn new(file_string: String) -> Self {
        Self {
            file_string,
            entry: DirEntry::new_zeroed_with_blank_name(),
            entry_pos: 0,
            entry_count: 1,
            invalid: false,
            ofile: None,
            short_name_forward_link: None,
            long_name_forward_link: None,
            previous: None,
            next: None,
        }
    }

    pub fn is_dot_dir_ent(&self) -> bool {
        self.file_string == "." || self.file_string == ".."
    }
}

/// Parsed state of an opened directory: the entries discovered so far (in
/// on-disk order), a sequential cursor and the dual name hash tables.
pub(crate) struct ODir {
    pub current_end_pos: u32,
    pub current_pos: u32,
    /// Entry the cursor last returned; `None` is before the first.
    pub cursor: Option<DirEntId>,
    pub end_of_dir: bool,
    /// Starting cluster, keying this structure while parked in the
    /// volume's directory cache.
    pub dir_cache_tag: u32,
    pub dir_ents: Arena<DirEnt>,
    pub head: Option<DirEntId>,
    pub tail: Option<DirEntId>,
    pub short_name_hash_table: Box<[Option<DirEntId>; HASH_TABLE_SIZE]>,
    pub long_name_hash_table: Box<[Option<DirEntId>; HASH_TABLE_SIZE]>,
}

impl ODir {
    pub fn new() -> Self {
        Self {
            current_end_pos: 0,
            current_pos: 0,
            cursor: None,
            end_of_dir: false,
            dir_cache_tag: 0,
            dir_ents: Arena::new(),
            head: None,
            tail: None,
            short_name_hash_table: Box::new([None; HASH_TABLE_SIZE]),
            long_name_hash_table: Box::new([None; HASH_TABLE_SIZE]),
        }
    }

    /// Links `id` before `anchor`, or at the tail for no anchor.
    fn link_before(&mut self, id: DirEntId, anchor: Option<DirEntId>) {
        match anchor {
            Some(anchor) => {
                let previous = self.dir_ents[anchor].previous;
                self.dir_ents[id].previous = previous;
                self.dir_ents[id].next = Some(anchor);
                self.dir_ents[anchor].previous = Some(id);
                match previous {
                    Some(previous) => self.dir_ents[previous].next = Some(id),
                    None => self.head = Some(id),
                }
            }
            None => {
                let previous = self.tail;
                self.dir_ents[id].previous = previous;
                self.dir_ents[id].next = None;
                self.tail = Some(id);
                match previous {
                    Some(previous) => self.dir_ents[previous].next = Some(id),
                    None => self.head = Some(id),
                }
            }
        }
    }

    fn unlink(&mut self, id: DirEntId) {
        let previous = self.dir_ents[id].previous;
        let next = self.dir_ents[id].next;
        match previous {
            Some(previous) => self.dir_ents[previous].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.dir_ents[next].previous = previous,
            None => self.tail = previous,
        }
        self.dir_ents[id].previous = None;
        self.dir_ents[id].next = None;
    }

    fn cursor_next(&self) -> Option<DirEntId> {
        match self.cursor {
            None => self.head,
            Some(cursor) => self.dir_ents[cursor].next,
        }
    }
}

impl<DS: DataStorage> Volume<DS> {
    /// Reads the 8.3 slot at `entry_pos` of the directory. Past the end of
    /// the directory file an empty-marker slot is synthesised.
    fn access_entry_read(&mut self, parent: OFileId, entry_pos: u32) -> Result<DirEntry> {
        let position = entry_pos as u64 * size_of::<DirEntry>() as u64;
        if position >= self.ofiles[parent].file_size as u64 {
            let mut entry = DirEntry::new_zeroed();
            entry.file_name[0] = EMPTY_ENTRY_MARK;
            return Ok(entry);
        }

        let mut entry = DirEntry::new_zeroed();
        let (_, status) = self.read_ofile_data(parent, position as u32, entry.as_mut_bytes());
        status?;
        Ok(entry)
    }

    fn access_entry_write(&mut self, parent: OFileId, entry_pos: u32, entry: &DirEntry) -> Result<()> {
        let position = entry_pos as u64 * size_of::<DirEntry>() as u64;
        debug_assert!(position < self.ofiles[parent].file_size as u64);
        let (_, status) = self.write_ofile_data(parent, position as u32, entry.as_bytes());
        status
    }

    /// Persists a directory entry: the 8.3 record, then the long-name
    /// slots in descending ordinal order at the preceding positions,
    /// padded with 0xFFFF beyond the terminator.
    pub(crate) fn store_dir_ent_raw(
        &mut self,
        parent: OFileId,
        entry: &DirEntry,
        entry_pos: u16,
        entry_count: u8,
        invalid: bool,
        file_string: &str,
    ) -> Result<()> {
        self.access_entry_write(parent, entry_pos as u32, entry)?;

        let lfn_count = entry_count.saturating_sub(1);
        if lfn_count == 0 {
            return Ok(());
        }

        let mut lfn_buffer = vec![0xFFFF_u16; lfn_count as usize * LFN_CHAR_TOTAL];
        for (at, unit) in file_string.encode_utf16().chain(Some(0)).enumerate() {
            lfn_buffer[at] = unit;
        }

        let mut lfn_entry = LfnEntry::new_zeroed();
        lfn_entry.attributes = ATTR_LFN;
        lfn_entry.checksum = short_name_checksum(&entry.file_name);
        let mut entry_pos = entry_pos;
        for lfn_ordinal in 1..=lfn_count {
            lfn_entry.ordinal = if lfn_ordinal == lfn_count {
                lfn_ordinal | FAT_LFN_LAST
            } else {
                lfn_ordinal
            };
            if invalid {
                lfn_entry.ordinal = DELETE_ENTRY_MARK;
            }

            let from = (lfn_ordinal as usize - 1) * LFN_CHAR_TOTAL;
            let mut chars = [0; LFN_CHAR_TOTAL];
            chars.copy_from_slice(&lfn_buffer[from..from + LFN_CHAR_TOTAL]);
            lfn_entry.set_chars(&chars);

            entry_pos -= 1;
            let record: DirEntry = transmute!(lfn_entry);
            self.access_entry_write(parent, entry_pos as u32, &record)?;
        }
        Ok(())
    }

    pub(crate) fn store_dir_ent_of(&mut self, parent: OFileId, id: DirEntId) -> Result<()> {
        let dir_ent = &self.odir(parent).dir_ents[id];
        let entry = dir_ent.entry;
        let entry_pos = dir_ent.entry_pos;
        let entry_count = dir_ent.entry_count;
        let invalid = dir_ent.invalid;
        let file_string = if entry_count > 1 {
            dir_ent.file_string.clone()
        } else {
            String::new()
        };
        self.store_dir_ent_raw(parent, &entry, entry_pos, entry_count, invalid, &file_string)
    }

    /// Reassembles the long name by reading the slots backwards from the
    /// 8.3 record, validating ordinal, attribute, checksum and the
    /// must-be-zero field. Any anomaly falls back to the case-flag
    /// rendering of the 8.3 name.
    fn load_long_name_entry(&mut self, parent: OFileId, entry_pos: u16, entry: &DirEntry) -> (String, u8) {
        let lfn_checksum = short_name_checksum(&entry.file_name);
        let mut lfn_buffer = Vec::new();
        let mut lfn_ordinal: u8 = 1;
        let mut entry_pos = entry_pos;
        let mut complete = false;

        while entry_pos != 0 {
            entry_pos -= 1;
            let Ok(record) = self.access_entry_read(parent, entry_pos as u32) else {
                break;
            };
            let lfn_entry: LfnEntry = transmute!(record);
            if lfn_entry.attributes != ATTR_LFN
                || lfn_entry.must_be_zero.get() != 0
                || lfn_entry.checksum != lfn_checksum
                || lfn_entry.ordinal & !FAT_LFN_LAST != lfn_ordinal
                || lfn_ordinal as usize > MAX_LFN_ENTRIES
            {
                break;
            }

            lfn_buffer.extend_from_slice(&lfn_entry.chars());
            lfn_ordinal += 1;
            if lfn_entry.ordinal & FAT_LFN_LAST != 0 {
                complete = true;
                break;
            }
        }

        if !complete {
            let collation = self.collation.clone();
            return (name::file_name_via_case_flag(entry, &*collation), 1);
        }

        let terminated = &lfn_buffer[..lfn_buffer
            .iter()
            .position(|&unit| unit == 0)
            .unwrap_or(lfn_buffer.len())];
        (String::from_utf16_lossy(terminated), lfn_ordinal)
    }

    /// Loads one more 8.3 slot from disk at the current end-of-directory
    /// position, skipping deleted and volume-label slots. Returns `None`
    /// once the empty marker (or the end of the directory file) is hit.
    pub(crate) fn load_next_dir_ent(&mut self, ofile: OFileId) -> Result<Option<DirEntId>> {
        debug_assert!(!self.odir(ofile).end_of_dir);

        let mut entry;
        loop {
            let current_end_pos = self.odir(ofile).current_end_pos;
            entry = self.access_entry_read(ofile, current_end_pos)?;
            if entry.file_name[0] != DELETE_ENTRY_MARK && entry.attributes & ATTR_VOLUME_ID == 0 {
                break;
            }
            self.odir_mut(ofile).current_end_pos += 1;
        }

        if entry.file_name[0] == EMPTY_ENTRY_MARK {
            self.odir_mut(ofile).end_of_dir = true;
            return Ok(None);
        }

        // The high cluster word is meaningless before FAT32; some tools
        // store data there.
        if self.fat_type != FatType::Fat32 {
            entry.cluster_high = U16::new(0);
        }

        let entry_pos = self.odir(ofile).current_end_pos as u16;
        let (file_string, entry_count) = self.load_long_name_entry(ofile, entry_pos, &entry);

        let mut dir_ent = DirEnt::new(file_string);
        dir_ent.entry = entry;
        dir_ent.entry_pos = entry_pos;
        dir_ent.entry_count = entry_count;

        let collation = self.collation.clone();
        let odir = self.odir_mut(ofile);
        let id = odir.dir_ents.insert(dir_ent);
        odir.link_before(id, None);
        odir.insert_to_hash_table(id, &*collation);
        odir.current_end_pos += 1;
        Ok(Some(id))
    }

    /// Looks a name up in the directory: the long-name hash first, then
    /// the short-name hash, then whatever part of the directory has not
    /// been parsed yet.
    pub(crate) fn search_odir(&mut self, ofile: OFileId, file_string: &str) -> Result<Option<DirEntId>> {
        let collation = self.collation.clone();
        let mut file_8dot3_name = [0; FAT_NAME_LEN];
        let possible_short_name =
            name::check_is_8dot3_name(file_string, &mut file_8dot3_name, &*collation);

        let odir = self.odir(ofile);
        let mut found = odir.long_name_search(file_string, &*collation);
        if found.is_none() && possible_short_name {
            found = odir.short_name_search(&file_8dot3_name);
        }

        if found.is_none() {
            while !self.odir(ofile).end_of_dir {
                let Some(id) = self.load_next_dir_ent(ofile)? else {
                    break;
                };
                let dir_ent = &self.odir(ofile).dir_ents[id];
                if collation.stri_cmp(file_string, &dir_ent.file_string) == Ordering::Equal
                    || possible_short_name && dir_ent.entry.file_name == file_8dot3_name
                {
                    found = Some(id);
                    break;
                }
            }
        }
        Ok(found)
    }

    pub(crate) fn reset_odir_cursor(&mut self, ofile: OFileId) {
        let odir = self.odir_mut(ofile);
        odir.cursor = None;
        odir.current_pos = 0;
    }

    /// Advances the cursor, loading one more entry from disk when the
    /// parsed list is exhausted. `None` marks the end of the directory.
    pub(crate) fn get_next_dir_ent(&mut self, ofile: OFileId) -> Result<Option<DirEntId>> {
        if self.odir(ofile).cursor_next().is_none() && !self.odir(ofile).end_of_dir {
            self.load_next_dir_ent(ofile)?;
        }

        let odir = self.odir_mut(ofile);
        match odir.cursor_next() {
            None => {
                odir.current_pos = odir.current_end_pos;
                Ok(None)
            }
            Some(id) => {
                odir.cursor = Some(id);
                odir.current_pos = odir.dir_ents[id].entry_pos as u32 + 1;
                Ok(Some(id))
            }
        }
    }

    fn expand_odir(&mut self, ofile: OFileId) -> Result<()> {
        let expanded_size = self.ofiles[ofile].file_size as u64 + self.cluster_size as u64;
        self.expand_ofile(ofile, expanded_size)
    }

    /// Scans the root directory for the volume-label slot, bypassing the
    /// parsed entry list (label slots are never parsed into it).
    fn seek_volume_id(&mut self, root: OFileId) -> Result<Option<(u16, DirEntry)>> {
        let mut entry_pos = 0;
        loop {
            let entry = self.access_entry_read(root, entry_pos)?;
            if entry.file_name[0] != DELETE_ENTRY_MARK
                && entry.attributes & !ATTR_ARCHIVE == ATTR_VOLUME_ID
            {
                return Ok(Some((entry_pos as u16, entry)));
            }
            if entry.file_name[0] == EMPTY_ENTRY_MARK {
                return Ok(None);
            }
            entry_pos += 1;
        }
    }

    /// First-fit reuse of deleted slots, the fallback once the directory
    /// has hit its hard entry cap. The only path that overwrites 0xE5
    /// slots, and it never overlaps the root's volume-label slot.
    fn first_fit_insert_dir_ent(
        &mut self,
        ofile: OFileId,
        dir_ent: &mut DirEnt,
    ) -> Result<Option<DirEntId>> {
        let mut label_pos = 0;
        if self.ofiles[ofile].parent.is_none() {
            if let Some((entry_pos, _)) = self.seek_volume_id(ofile)? {
                label_pos = entry_pos as u32;
            }
        }

        let entry_count = dir_ent.entry_count as u32;
        let mut new_entry_pos = entry_count;
        let mut current_pos = 0;
        let odir = self.odir(ofile);
        let mut anchor = odir.head;
        let mut found = false;
        while let Some(id) = anchor {
            let current = &odir.dir_ents[id];
            if new_entry_pos + current.entry_count as u32 <= current.entry_pos as u32
                && (label_pos > new_entry_pos || label_pos <= current_pos)
            {
                found = true;
                break;
            }

            current_pos = current.entry_pos as u32;
            new_entry_pos = current_pos + entry_count;
            anchor = current.next;
        }

        if !found && new_entry_pos >= odir.current_end_pos {
            return Err(Error::Fs(FsError::VolumeFull));
        }

        dir_ent.entry_pos = new_entry_pos as u16;
        Ok(anchor)
    }

    /// Finds the on-disk position for a new entry: appended at the current
    /// end (growing the directory by a cluster when needed), or placed by
    /// first fit at the entry cap. Also stamps the creation times.
    /// Returns the list anchor the entry goes in front of.
    fn new_entry_pos(&mut self, ofile: OFileId, dir_ent: &mut DirEnt) -> Result<Option<DirEntId>> {
        while !self.odir(ofile).end_of_dir {
            self.load_next_dir_ent(ofile)?;
        }

        let now = self.clock.now();
        dir_ent.entry.create_date = U16::new(pack_date(&now));
        dir_ent.entry.create_time = U16::new(pack_time(&now));
        dir_ent.entry.modification_date = dir_ent.entry.create_date;
        dir_ent.entry.modification_time = dir_ent.entry.create_time;
        dir_ent.entry.last_access_date = dir_ent.entry.create_date;

        let new_end_pos = self.odir(ofile).current_end_pos + dir_ent.entry_count as u32;
        if new_end_pos as u64 * size_of::<DirEntry>() as u64 > self.ofiles[ofile].file_size as u64 {
            let cap = if self.ofiles[ofile].is_fixed_root_dir {
                self.root_entries
            } else {
                MAX_DIRENTRY_COUNT
            };
            if new_end_pos >= cap {
                return self.first_fit_insert_dir_ent(ofile, dir_ent);
            }

            while new_end_pos as u64 * size_of::<DirEntry>() as u64
                > self.ofiles[ofile].file_size as u64
            {
                self.expand_odir(ofile)?;
            }
        }

        self.odir_mut(ofile).current_end_pos = new_end_pos;
        dir_ent.entry_pos = (new_end_pos - 1) as u16;
        Ok(None)
    }

    /// Creates a directory entry for `file_string` in the directory,
    /// synthesising a unique 8.3 name (or case flags) and persisting the
    /// record and its long-name chain.
    pub(crate) fn create_dir_ent(
        &mut self,
        ofile: OFileId,
        file_string: &str,
        attributes: u8,
    ) -> Result<DirEntId> {
        // Short-name synthesis probes the whole directory.
        while !self.odir(ofile).end_of_dir {
            self.load_next_dir_ent(ofile)?;
        }

        let collation = self.collation.clone();
        let mut dir_ent = DirEnt::new(file_string.to_string());
        match file_string {
            "." => {
                dir_ent.entry.file_name[0] = b'.';
                clone_dir_ent_info(&mut dir_ent.entry, &self.dirent_of(ofile).entry);
            }
            ".." => {
                dir_ent.entry.file_name[0] = b'.';
                dir_ent.entry.file_name[1] = b'.';
                let parent = self.ofiles[ofile].parent.ok_or(Error::Fs(FsError::Inconsistent))?;
                clone_dir_ent_info(&mut dir_ent.entry, &self.dirent_of(parent).entry);
            }
            _ => {
                if name::check_is_8dot3_name(file_string, &mut dir_ent.entry.file_name, &*collation)
                {
                    let (case_flag, needs_lfn) = name::case_flag_for(file_string, &*collation);
                    dir_ent.entry.case_flag = case_flag;
                    if needs_lfn {
                        dir_ent.entry_count += 1;
                    }
                } else {
                    name::create_8dot3_name(
                        self.odir(ofile),
                        file_string,
                        &mut dir_ent.entry.file_name,
                    );
                    dir_ent.entry_count +=
                        lfn_entry_count(name::str_len_utf16(file_string)) as u8;
                }
            }
        }

        let anchor = self.new_entry_pos(ofile, &mut dir_ent)?;
        dir_ent.entry.attributes = attributes;

        let odir = self.odir_mut(ofile);
        let id = odir.dir_ents.insert(dir_ent);
        odir.link_before(id, anchor);
        odir.insert_to_hash_table(id, &*collation);

        debug!("Created directory entry '{file_string}'");
        self.store_dir_ent_of(ofile, id)?;
        Ok(id)
    }

    /// Unlinks the entry, stamps the deleted marker and persists it (which
    /// also stamps the long-name slots).
    pub(crate) fn remove_dir_ent(&mut self, ofile: OFileId, id: DirEntId) -> Result<()> {
        let collation = self.collation.clone();
        let odir = self.odir_mut(ofile);
        if odir.cursor == Some(id) {
            odir.cursor = odir.dir_ents[id].previous;
        }
        odir.unlink(id);
        odir.delete_from_hash_table(id, &*collation);
        odir.dir_ents[id].entry.file_name[0] = DELETE_ENTRY_MARK;
        odir.dir_ents[id].invalid = true;
        self.store_dir_ent_of(ofile, id)
    }

    /// Opens (or finds already open) the file behind a directory entry;
    /// `None`/`None` opens the root. Establishes the entry/open-file cross
    /// reference and queues the open file for the reference sweep.
    pub(crate) fn open_dir_ent(
        &mut self,
        parent: Option<OFileId>,
        dir_ent: Option<DirEntId>,
    ) -> Result<OFileId> {
        let existing = match (parent, dir_ent) {
            (Some(parent), Some(id)) => self.odir(parent).dir_ents[id].ofile,
            _ => self.root_dir_ent.ofile,
        };
        if let Some(ofile) = existing {
            return Ok(ofile);
        }

        let mut file = OFile::new(parent);
        let attributes;
        match (parent, dir_ent) {
            (Some(parent_id), Some(id)) => {
                let entry = &self.odir(parent_id).dir_ents[id];
                attributes = entry.entry.attributes;
                file.file_size = entry.entry.file_size.get();
                file.file_cluster = entry.entry.cluster();
                file.full_path_len = self.ofiles[parent_id].full_path_len
                    + 1
                    + name::str_len_utf16(&entry.file_string);
                file.dir_ent = Some(id);
            }
            _ => {
                attributes = self.root_dir_ent.entry.attributes;
                file.file_cluster = self.root_cluster;
                if self.fat_type != FatType::Fat32 {
                    file.is_fixed_root_dir = true;
                }
            }
        }
        file.file_current_cluster = file.file_cluster;
        file.on_check_ref = true;

        let ofile = self.ofiles.insert(file);
        self.check_ref.push(ofile);
        match parent {
            Some(parent) => self.ofiles[parent].child_list.push(ofile),
            None => self.root = Some(ofile),
        }

        if attributes & ATTR_DIRECTORY != 0 {
            let file_size = if self.ofiles[ofile].is_fixed_root_dir {
                self.root_entries * size_of::<DirEntry>() as u32
            } else {
                let file_cluster = self.ofiles[ofile].file_cluster;
                self.physical_dir_size(file_cluster)
            };
            self.ofiles[ofile].file_size = file_size;
            self.request_odir(ofile);
        }

        match (parent, dir_ent) {
            (Some(parent), Some(id)) => self.odir_mut(parent).dir_ents[id].ofile = Some(ofile),
            _ => self.root_dir_ent.ofile = Some(ofile),
        }
        Ok(ofile)
    }

    /// Frees a no-longer-referenced open file: its directory structure
    /// goes to the directory cache, the entry cross reference is broken,
    /// and the entry itself is freed if it was deleted.
    pub(crate) fn close_dir_ent(&mut self, ofile: OFileId) {
        let parent = self.ofiles[ofile].parent;
        let dir_ent = self.ofiles[ofile].dir_ent;
        let invalid = self.dirent_of(ofile).invalid;

        if self.ofiles[ofile].odir.is_some() {
            self.discard_odir(ofile, invalid);
        }

        match parent {
            Some(parent) => self.ofiles[parent].child_list.retain(|&child| child != ofile),
            None => self.root = None,
        }
        self.ofiles.remove(ofile);

        match (parent, dir_ent) {
            (Some(parent), Some(id)) => {
                self.odir_mut(parent).dir_ents[id].ofile = None;
                if invalid {
                    // Removed from the list and hash tables when it was
                    // deleted; only the slot remains.
                    self.odir_mut(parent).dir_ents.remove(id);
                }
            }
            _ => self.root_dir_ent.ofile = None,
        }
    }

    /// Walks `path` from `start`, opening every component that exists.
    /// When only the final component is missing its validated name is
    /// returned for the caller to create; a missing inner component fails
    /// with not-found.
    pub(crate) fn locate_ofile(
        &mut self,
        start: OFileId,
        path: &str,
        attributes: u8,
    ) -> Result<(OFileId, Option<String>)> {
        if path.is_empty() {
            return Err(Error::Fs(FsError::InvalidParameter));
        }

        let dir_intended = path.ends_with(name::PATH_NAME_SEPARATOR);
        let mut ofile = start;
        let mut rest = path;
        if let Some(stripped) = rest.strip_prefix(name::PATH_NAME_SEPARATOR) {
            ofile = self.root.ok_or(Error::Fs(FsError::NotFound))?;
            rest = stripped;
        }

        // Full paths render as `X:\...\name<NUL>` and may not exceed 260
        // UTF-16 units.
        if 2 + self.ofiles[ofile].full_path_len + 1 + name::str_len_utf16(rest) + 1
            > name::PATH_STRING_LENGTH
        {
            return Err(Error::Fs(FsError::InvalidParameter));
        }

        loop {
            let (component, next) = name::next_name_component(rest);
            if component.is_empty() {
                if dir_intended && !self.ofiles[ofile].is_directory() {
                    return Err(Error::Fs(FsError::NotFound));
                }
                return Ok((ofile, None));
            }
            if component == "." {
                rest = next;
                continue;
            }
            if component == ".." {
                ofile = self.ofiles[ofile]
                    .parent
                    .ok_or(Error::Fs(FsError::InvalidParameter))?;
                rest = next;
                continue;
            }

            let file_name =
                name::file_name_is_valid(component).ok_or(Error::Fs(FsError::InvalidParameter))?;
            if !self.ofiles[ofile].is_directory() {
                return Err(Error::Fs(FsError::NotFound));
            }

            match self.search_odir(ofile, &file_name)? {
                None => {
                    if !next.is_empty() {
                        return Err(Error::Fs(FsError::NotFound));
                    }
                    if dir_intended && attributes & ATTR_DIRECTORY == 0 {
                        return Err(Error::Fs(FsError::InvalidParameter));
                    }
                    return Ok((ofile, Some(file_name)));
                }
                Some(id) => {
                    ofile = self.open_dir_ent(Some(ofile), Some(id))?;
                    rest = next;
                }
            }
        }
    }

    /// Builds the externally visible info record for a directory entry.
    pub(crate) fn file_info_from_entry(&mut self, entry: &DirEntry, file_name: String) -> FileInfo {
        let (file_size, physical_size) = if entry.attributes & ATTR_DIRECTORY != 0 {
            let physical_size = self.physical_dir_size(entry.cluster()) as u64;
            (physical_size, physical_size)
        } else {
            (
                entry.file_size.get() as u64,
                self.physical_file_size(entry.file_size.get()),
            )
        };
        FileInfo {
            file_size,
            physical_size,
            create_time: unpack_date_time(entry.create_date.get(), entry.create_time.get()),
            last_access_time: unpack_date(entry.last_access_date.get()),
            modification_time: unpack_date_time(
                entry.modification_date.get(),
                entry.modification_time.get(),
            ),
            attributes: FileAttributes::from_bits_truncate(entry.attributes)
                & FileAttributes::VALID,
            file_name,
        }
    }

    /// Creates the `.` and `..` entries of a newly created directory,
    /// cloning their metadata from the directory and its parent.
    pub(crate) fn create_dot_dir_ents(&mut self, ofile: OFileId) -> Result<()> {
        self.expand_odir(ofile)?;
        self.set_dir_ent_cluster(ofile);
        self.create_dir_ent(ofile, ".", ATTR_DIRECTORY)?;
        self.create_dir_ent(ofile, "..", ATTR_DIRECTORY)?;
        Ok(())
    }

    pub(crate) fn set_dir_ent_cluster(&mut self, ofile: OFileId) {
        let file_cluster = self.ofiles[ofile].file_cluster;
        self.dirent_of_mut(ofile).entry.set_cluster(file_cluster);
    }

    /// Commits the file's size and starting cluster into its directory
    /// entry. Directories keep a zero recorded size.
    pub(crate) fn update_dir_ent_cluster_size_info(&mut self, ofile: OFileId) {
        debug_assert!(!self.ofiles[ofile].is_directory());
        let file_size = self.ofiles[ofile].file_size;
        self.dirent_of_mut(ofile).entry.file_size = file_size.into();
        self.set_dir_ent_cluster(ofile);
    }

    /// Reads the volume label from the root directory.
    pub(crate) fn get_volume_entry(&mut self) -> Result<String> {
        let root = self.root.ok_or(Error::Fs(FsError::NotFound))?;
        let collation = self.collation.clone();
        Ok(match self.seek_volume_id(root)? {
            Some((_, entry)) => name::fat_name_to_str(&entry.file_name, false, &*collation),
            None => String::new(),
        })
    }

    /// Writes the volume label, creating the label slot on demand. Labels
    /// that do not transcode to OEM are unsupported.
    pub(crate) fn set_volume_entry(&mut self, file_string: &str) -> Result<()> {
        let root = self.root.ok_or(Error::Fs(FsError::NotFound))?;
        let (entry_pos, mut entry) = match self.seek_volume_id(root)? {
            Some((entry_pos, entry)) => (entry_pos, entry),
            None => {
                let mut dir_ent = DirEnt::new(String::new());
                self.new_entry_pos(root, &mut dir_ent)?;
                dir_ent.entry.attributes = ATTR_VOLUME_ID;
                (dir_ent.entry_pos, dir_ent.entry)
            }
        };

        entry.file_name.fill(b' ');
        let collation = self.collation.clone();
        if collation.str_to_fat(file_string, &mut entry.file_name) {
            return Err(Error::Fs(FsError::Unsupported));
        }

        let now = self.clock.now();
        entry.modification_date = U16::new(pack_date(&now));
        entry.modification_time = U16::new(pack_time(&now));
        self.store_dir_ent_raw(root, &entry, entry_pos, 1, false, "")
    }
}

/// Copies the shared metadata block (everything from the case flag on)
/// between two records; used by dot entries and rename.
pub(crate) fn clone_dir_ent_info(entry1: &mut DirEntry, entry2: &DirEntry) {
    entry1.as_mut_bytes()[ENTRY_INFO_OFFSET..]
        .copy_from_slice(&entry2.as_bytes()[ENTRY_INFO_OFFSET..]);
}
