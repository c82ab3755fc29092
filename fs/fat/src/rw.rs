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
use hyrax_fs::{FileInfo, Result};

use crate::{
    dirent::DirEntry,
    disk::IoArea,
    file::{IFileId, OFileId},
    volume::Volume,
};

/// Zero-fill works through a bounded scratch buffer.
const MAX_ZERO_CHUNK: usize = 0xA0_0000;

impl<DS: DataStorage> Volume<DS> {
    /// Reads file bytes starting at `position`, chunked by the contiguous
    /// runs the space engine reports. Returns how many bytes were
    /// transferred along with the status; a mid-transfer failure keeps the
    /// completed byte count.
    pub(crate) fn read_ofile_data(
        &mut self,
        ofile: OFileId,
        position: u32,
        buffer: &mut [u8],
    ) -> (usize, Result<()>) {
        let mut position = position;
        let mut transferred = 0;
        while transferred < buffer.len() {
            let remaining = (buffer.len() - transferred) as u64;
            if let Err(error) = self.ofile_position(ofile, position, remaining) {
                return (transferred, Err(error));
            }

            let file = &self.ofiles[ofile];
            let length = remaining.min(file.pos_rem) as usize;
            let pos_disk = file.pos_disk;
            if let Err(error) =
                self.disk_read(IoArea::Data, pos_disk, &mut buffer[transferred..transferred + length])
            {
                return (transferred, Err(error));
            }

            position += length as u32;
            transferred += length;
            debug_assert!(position <= self.ofiles[ofile].file_size);
        }
        (transferred, Ok(()))
    }

    /// Writes file bytes starting at `position`; the counterpart of
    /// [`Self::read_ofile_data`]. Marks the open file dirty and in need of
    /// the archive attribute.
    pub(crate) fn write_ofile_data(
        &mut self,
        ofile: OFileId,
        position: u32,
        buffer: &[u8],
    ) -> (usize, Result<()>) {
        let mut position = position;
        let mut transferred = 0;
        while transferred < buffer.len() {
            let remaining = (buffer.len() - transferred) as u64;
            if let Err(error) = self.ofile_position(ofile, position, remaining) {
                return (transferred, Err(error));
            }

            let file = &self.ofiles[ofile];
            let length = remaining.min(file.pos_rem) as usize;
            let pos_disk = file.pos_disk;
            if let Err(error) =
                self.disk_write(IoArea::Data, pos_disk, &buffer[transferred..transferred + length])
            {
                return (transferred, Err(error));
            }

            position += length as u32;
            transferred += length;
            let file = &mut self.ofiles[ofile];
            file.dirty = true;
            file.archive = true;
            debug_assert!(position <= file.file_size);
        }
        (transferred, Ok(()))
    }

    /// Grows the file to `expanded_size` and zero-fills the appended
    /// range. Partially allocated space is released again on failure, the
    /// file keeps its original size.
    pub(crate) fn expand_ofile(&mut self, ofile: OFileId, expanded_size: u64) -> Result<()> {
        let write_pos = self.ofiles[ofile].file_size;
        let mut status = self.grow_eof(ofile, expanded_size);
        if status.is_ok() {
            status = self.write_zero_pool(ofile, write_pos);
        }
        if status.is_err() {
            self.ofiles[ofile].file_size = write_pos;
            let _ = self.shrink_eof(ofile);
        }
        status
    }

    /// Zero-fills from `write_pos` to the end of the file.
    pub(crate) fn write_zero_pool(&mut self, ofile: OFileId, write_pos: u32) -> Result<()> {
        let mut write_pos = write_pos;
        let mut appended_size = (self.ofiles[ofile].file_size - write_pos) as usize;
        let zero_buffer = vec![0; appended_size.min(MAX_ZERO_CHUNK)];

        while appended_size > 0 {
            let write_size = appended_size.min(zero_buffer.len());
            let (_, status) = self.write_ofile_data(ofile, write_pos, &zero_buffer[..write_size]);
            status?;
            write_pos += write_size as u32;
            appended_size -= write_size;
        }
        Ok(())
    }

    /// Truncates the file to `truncated_size`, freeing the clusters beyond
    /// it.
    pub(crate) fn truncate_ofile(&mut self, ofile: OFileId, truncated_size: u32) -> Result<()> {
        self.ofiles[ofile].file_size = truncated_size;
        self.shrink_eof(ofile)
    }

    /// Directory read: returns the info record of the next entry after the
    /// handle position, or `None` at the end of the directory. The handle
    /// position advances in 32-byte slot units.
    pub(crate) fn ifile_read_dir(&mut self, ifile: IFileId) -> Result<Option<FileInfo>> {
        let ofile = self.ifiles[ifile].ofile;
        let current_pos = (self.ifiles[ifile].position / size_of::<DirEntry>() as u64) as u32;

        // Another handle may have moved the shared cursor; rewind if it is
        // past this handle's position.
        if current_pos < self.odir(ofile).current_pos {
            self.reset_odir_cursor(ofile);
        }

        loop {
            let Some(id) = self.get_next_dir_ent(ofile)? else {
                self.ifiles[ifile].position =
                    self.odir(ofile).current_pos as u64 * size_of::<DirEntry>() as u64;
                return Ok(None);
            };
            if self.odir(ofile).current_pos > current_pos {
                let dir_ent = &self.odir(ofile).dir_ents[id];
                let entry = dir_ent.entry;
                let file_name = dir_ent.file_string.clone();
                let info = self.file_info_from_entry(&entry, file_name);
                self.ifiles[ifile].position =
                    self.odir(ofile).current_pos as u64 * size_of::<DirEntry>() as u64;
                return Ok(Some(info));
            }
        }
    }
}
