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
use hyrax_fs::{Error, FileAttributes, FileInfo, FileSystemInfo, FsError, Result};
use zerocopy::little_endian::U16;

use crate::{
    dir::clone_dir_ent_info,
    dirent::{pack_date, pack_time, ATTR_DIRECTORY, ATTR_READ_ONLY},
    file::{IFileId, OFileId},
    volume::Volume,
};

impl<DS: DataStorage> Volume<DS> {
    pub(crate) fn get_file_info(&mut self, ofile: OFileId) -> FileInfo {
        let dir_ent = self.dirent_of(ofile);
        let entry = dir_ent.entry;
        let file_name = dir_ent.file_string.clone();
        self.file_info_from_entry(&entry, file_name)
    }

    pub(crate) fn get_volume_info(&mut self) -> FileSystemInfo {
        // A label read failure degrades to an empty label.
        let volume_label = self.get_volume_entry().unwrap_or_default();
        self.compute_free_info();
        FileSystemInfo {
            read_only: self.read_only,
            volume_size: (self.max_cluster as u64) << self.cluster_alignment,
            free_space: (self.free_info.cluster_count as u64) << self.cluster_alignment,
            block_size: self.cluster_size,
            volume_label,
        }
    }

    /// Applies a file-info record: attributes, times, rename (when
    /// `file_name` resolves somewhere else) and size changes.
    pub(crate) fn set_file_info(
        &mut self,
        ifile: IFileId,
        ofile: OFileId,
        info: &FileInfo,
    ) -> Result<()> {
        // The root directory cannot be updated.
        let Some(old_parent) = self.ofiles[ofile].parent else {
            return Err(Error::Fs(FsError::AccessDenied));
        };

        let read_only = self.ifiles[ifile].read_only
            || self.dirent_of(ofile).entry.attributes & ATTR_READ_ONLY != 0;

        // A zero time leaves the stored time untouched.
        if !info.create_time.is_zero() {
            if !info.create_time.is_valid() {
                return Err(Error::Fs(FsError::InvalidParameter));
            }
            if !read_only {
                let dir_ent = self.dirent_of_mut(ofile);
                dir_ent.entry.create_date = U16::new(pack_date(&info.create_time));
                dir_ent.entry.create_time = U16::new(pack_time(&info.create_time));
            }
        }

        if !info.modification_time.is_zero() {
            if !info.modification_time.is_valid() {
                return Err(Error::Fs(FsError::InvalidParameter));
            }
            if !read_only {
                let dir_ent = self.dirent_of_mut(ofile);
                dir_ent.entry.modification_date = U16::new(pack_date(&info.modification_time));
                dir_ent.entry.modification_time = U16::new(pack_time(&info.modification_time));
            }
            self.ofiles[ofile].preserve_last_modification = true;
        }

        if !FileAttributes::VALID.contains(info.attributes) {
            return Err(Error::Fs(FsError::InvalidParameter));
        }

        let new_attributes = info.attributes.bits();
        // The directory bit is immutable.
        if (new_attributes ^ self.dirent_of(ofile).entry.attributes) & ATTR_DIRECTORY != 0 {
            return Err(Error::Fs(FsError::AccessDenied));
        }

        // Attributes change even through a read-only handle.
        {
            let dir_ent = self.dirent_of_mut(ofile);
            dir_ent.entry.attributes =
                dir_ent.entry.attributes & !FileAttributes::VALID.bits() | new_attributes;
        }

        // Resolve the supplied name relative to the parent; an unresolved
        // tail means rename/move.
        let attributes = self.dirent_of(ofile).entry.attributes;
        let (new_parent, remaining) = self.locate_ofile(old_parent, &info.file_name, attributes)?;

        if let Some(new_file_name) = remaining {
            // Renaming a directory with open files below it (or into
            // itself) is refused.
            if !self.ofiles[ofile].child_list.is_empty() || new_parent == ofile {
                return Err(Error::Fs(FsError::AccessDenied));
            }
            if read_only {
                return Err(Error::Fs(FsError::AccessDenied));
            }

            let old_dir_ent = self.ofiles[ofile].dir_ent.ok_or(Error::Fs(FsError::AccessDenied))?;
            let old_entry = self.dirent_of(ofile).entry;
            self.remove_dir_ent(old_parent, old_dir_ent)?;
            self.odir_mut(old_parent).dir_ents.remove(old_dir_ent);

            let new_dir_ent = self.create_dir_ent(new_parent, &new_file_name, attributes)?;
            clone_dir_ent_info(
                &mut self.odir_mut(new_parent).dir_ents[new_dir_ent].entry,
                &old_entry,
            );
            self.odir_mut(new_parent).dir_ents[new_dir_ent].ofile = Some(ofile);
            self.ofiles[ofile].dir_ent = Some(new_dir_ent);
            self.ofiles[ofile].parent = Some(new_parent);
            self.ofiles[old_parent].child_list.retain(|&child| child != ofile);
            self.ofiles[new_parent].child_list.push(ofile);

            // A moved directory carries its dot entries' metadata along.
            if self.ofiles[ofile].is_directory() {
                self.reset_odir_cursor(ofile);
                for source in [ofile, new_parent] {
                    let dot = self.get_next_dir_ent(ofile)?;
                    let Some(dot) = dot else {
                        return Err(Error::Fs(FsError::Inconsistent));
                    };
                    if !self.odir(ofile).dir_ents[dot].is_dot_dir_ent() {
                        return Err(Error::Fs(FsError::Inconsistent));
                    }

                    let source_entry = self.dirent_of(source).entry;
                    clone_dir_ent_info(
                        &mut self.odir_mut(ofile).dir_ents[dot].entry,
                        &source_entry,
                    );
                    self.store_dir_ent_of(ofile, dot)?;
                }
            }

            self.ofiles[ofile].archive = true;
        } else if new_parent != ofile {
            // The name refers to a different, existing file.
            return Err(Error::Fs(FsError::AccessDenied));
        }

        if info.file_size != self.ofiles[ofile].file_size as u64 {
            if self.ofiles[ofile].is_directory() || read_only {
                return Err(Error::Fs(FsError::AccessDenied));
            }

            if info.file_size > self.ofiles[ofile].file_size as u64 {
                self.expand_ofile(ofile, info.file_size)?;
            } else {
                self.truncate_ofile(ofile, info.file_size as u32)?;
            }
            self.update_dir_ent_cluster_size_info(ofile);
        }

        self.ofiles[ofile].dirty = true;
        self.ofile_flush(ofile)
    }
}
