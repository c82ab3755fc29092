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
use hyrax_fs::{Error, Result};

use crate::{
    dir::{DirEnt, DirEntId, ODir},
    dirent::{pack_date, pack_time, ATTR_ARCHIVE},
    table::CLUSTER_FREE,
    volume::{FatType, Volume},
};
use zerocopy::little_endian::U16;

pub(crate) type OFileId = usize;
pub(crate) type IFileId = usize;

/// An opened file or directory; at most one per on-disk object, shared by
/// every handle opened on it.
pub(crate) struct OFile {
    /// Permanent error; every subsequent operation short-circuits on it.
    pub error: Option<Error>,

    pub file_size: u32,
    pub file_cluster: u32,
    /// Cluster holding the last computed position.
    pub file_current_cluster: u32,
    /// Chain tail for O(1) append; zero means unknown.
    pub file_last_cluster: u32,

    pub dirty: bool,
    pub is_fixed_root_dir: bool,
    pub preserve_last_modification: bool,
    pub archive: bool,

    /// Position cache maintained by the space engine.
    pub position: u32,
    pub pos_disk: u64,
    pub pos_rem: u64,

    pub parent: Option<OFileId>,
    pub full_path_len: usize,
    pub child_list: Vec<OFileId>,
    pub open_count: usize,

    /// Present while this open file is a directory.
    pub odir: Option<Box<ODir>>,
    /// This file's entry in the parent directory; the root uses the
    /// volume's synthetic entry instead.
    pub dir_ent: Option<DirEntId>,

    pub on_check_ref: bool,
}

impl OFile {
    pub fn new(parent: Option<OFileId>) -> Self {
        Self {
            error: None,
            file_size: 0,
            file_cluster: CLUSTER_FREE,
            file_current_cluster: CLUSTER_FREE,
            file_last_cluster: 0,
            dirty: false,
            is_fixed_root_dir: false,
            preserve_last_modification: false,
            archive: false,
            position: 0,
            pos_disk: 0,
            pos_rem: 0,
            parent,
            full_path_len: 0,
            child_list: Vec::new(),
            open_count: 0,
            odir: None,
            dir_ent: None,
            on_check_ref: false,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.odir.is_some()
    }
}

/// One open handle. Handles share the open file but keep their own
/// position and access mode.
pub(crate) struct IFile {
    pub ofile: OFileId,
    pub position: u64,
    pub read_only: bool,
}

impl<DS: DataStorage> Volume<DS> {
    pub(crate) fn odir(&self, ofile: OFileId) -> &ODir {
        self.ofiles[ofile].odir.as_deref().expect("not a directory")
    }

    pub(crate) fn odir_mut(&mut self, ofile: OFileId) -> &mut ODir {
        self.ofiles[ofile].odir.as_deref_mut().expect("not a directory")
    }

    pub(crate) fn dirent_of(&self, ofile: OFileId) -> &DirEnt {
        match self.ofiles[ofile].dir_ent {
            None => &self.root_dir_ent,
            Some(id) => {
                let parent = self.ofiles[ofile].parent.expect("detached directory entry");
                &self.odir(parent).dir_ents[id]
            }
        }
    }

    pub(crate) fn dirent_of_mut(&mut self, ofile: OFileId) -> &mut DirEnt {
        match self.ofiles[ofile].dir_ent {
            None => &mut self.root_dir_ent,
            Some(id) => {
                let parent = self.ofiles[ofile].parent.expect("detached directory entry");
                &mut self.odir_mut(parent).dir_ents[id]
            }
        }
    }

    pub(crate) fn allocate_ifile(&mut self, ofile: OFileId, read_only: bool) -> IFileId {
        self.ofiles[ofile].open_count += 1;
        self.ifiles.insert(IFile {
            ofile,
            position: 0,
            read_only,
        })
    }

    /// Releases the handle and queues its open file for the reference
    /// sweep.
    pub(crate) fn ifile_close(&mut self, ifile: IFileId) {
        let Some(ifile) = self.ifiles.remove(ifile) else {
            return;
        };
        let ofile = ifile.ofile;
        self.ofiles[ofile].open_count -= 1;
        if !self.ofiles[ofile].on_check_ref {
            self.ofiles[ofile].on_check_ref = true;
            self.check_ref.push(ofile);
        }
    }

    /// Commits the dirty metadata of the open file and of every parent up
    /// to the root: last access and modification stamps, the archive
    /// attribute and the directory entry itself. Inner entries persist
    /// before the parent directory's own update.
    pub(crate) fn ofile_flush(&mut self, ofile: OFileId) -> Result<()> {
        let mut current = Some(ofile);
        while let Some(id) = current {
            if let Some(error) = self.ofiles[id].error {
                return Err(error);
            }

            let parent = self.ofiles[id].parent;
            if self.ofiles[id].dirty {
                let now = self.clock.now();
                let preserve = self.ofiles[id].preserve_last_modification;
                let archive = self.ofiles[id].archive;

                let dir_ent = self.dirent_of_mut(id);
                dir_ent.entry.last_access_date = U16::new(pack_date(&now));
                if !preserve {
                    dir_ent.entry.modification_date = U16::new(pack_date(&now));
                    dir_ent.entry.modification_time = U16::new(pack_time(&now));
                }
                if archive {
                    dir_ent.entry.attributes |= ATTR_ARCHIVE;
                }
                let invalid = dir_ent.invalid;

                self.ofiles[id].preserve_last_modification = false;
                self.ofiles[id].archive = false;

                if let Some(parent) = parent {
                    if !invalid {
                        let dir_ent = self.ofiles[id].dir_ent.expect("non-root without an entry");
                        self.store_dir_ent_of(parent, dir_ent)?;
                    }
                }

                self.ofiles[id].dirty = false;
            }

            current = parent;
        }
        Ok(())
    }

    fn remove_check_ref(&mut self, ofile: OFileId) {
        if self.ofiles[ofile].on_check_ref {
            self.ofiles[ofile].on_check_ref = false;
            self.check_ref.retain(|&id| id != ofile);
        }
    }

    /// Flushes the open file and frees it when nothing references it
    /// anymore. Returns whether it was freed.
    pub(crate) fn check_ofile_ref(&mut self, ofile: OFileId) -> bool {
        self.remove_check_ref(ofile);
        let _ = self.ofile_flush(ofile);

        let file = &self.ofiles[ofile];
        if file.open_count > 0 || !file.child_list.is_empty() {
            return false;
        }

        self.close_dir_ent(ofile);
        true
    }

    /// Sweeps the pending reference list, freeing unreferenced open files
    /// and cascading up their parents.
    pub(crate) fn check_volume_ref(&mut self) {
        while let Some(ofile) = self.check_ref.pop() {
            self.ofiles[ofile].on_check_ref = false;
            let mut current = Some(ofile);
            while let Some(id) = current {
                current = self.ofiles[id].parent;
                if !self.check_ofile_ref(id) {
                    break;
                }
            }
        }
    }

    /// Latches a permanent error on the open file and all its currently
    /// open descendants. An already latched error is not overwritten.
    pub(crate) fn set_volume_error(&mut self, ofile: OFileId, error: Error) {
        let mut stack = vec![ofile];
        while let Some(id) = stack.pop() {
            let file = &mut self.ofiles[id];
            if file.error.is_none() {
                file.error = Some(error);
            }
            stack.extend(file.child_list.iter().copied());
        }
    }

    /// Post-operation housekeeping: latch `status` on the touched open
    /// file, run the reference sweep, and on a live volume write back the
    /// free-cluster hint, clear the dirty flag and flush both caches.
    pub(crate) fn cleanup_volume(&mut self, ofile: Option<OFileId>, status: Result<()>) -> Result<()> {
        if let (Some(id), Err(error)) = (ofile, status) {
            self.set_volume_error(id, error);
        }

        self.check_volume_ref();
        if self.valid {
            // The dirty flag comes off the disk only on a clean path; once
            // the device misbehaved the volume stays marked for the next
            // mount to notice.
            if status.is_ok() && !self.disk_error {
                if self.free_info_valid && self.fat_dirty && self.free_info_pos != 0 {
                    self.write_free_info()?;
                }

                if self.fat_dirty && self.fat_type != FatType::Fat12 {
                    self.fat_dirty = false;
                    let not_dirty_value = self.not_dirty_value;
                    self.write_volume_dirty(not_dirty_value)?;
                }
            }

            self.flush_disk_cache()?;
        }
        status
    }
}
