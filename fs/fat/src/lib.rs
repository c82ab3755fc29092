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

//! Read/write FAT12/FAT16/FAT32 file system with long file name support,
//! served over a [`DataStorage`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hyrax_ds::DataStorage;
use hyrax_fs::{
    collation::{EnglishCollation, UnicodeCollation},
    time::{Clock, SystemClock},
    Error, FileAttributes, FileId, FileInfo, FileSystem, FileSystemInfo, FsError, IoError,
    OpenMode, Result,
};

mod arena;
mod dir;
mod dircache;
mod dirent;
mod disk;
mod file;
mod hash;
mod info;
mod name;
mod rw;
mod space;
mod table;
mod volume;

use dirent::{ATTR_DIRECTORY, ATTR_READ_ONLY};
use file::{IFileId, OFileId};
use volume::Volume;

/// One mounted volume and its open-file tree, behind the file-system lock.
/// Every operation of the [`FileSystem`] protocol acquires the lock on
/// entry and runs to completion under it.
pub struct FileSystemServer<DS: DataStorage> {
    volume: Mutex<Volume<DS>>,
}

impl<DS: DataStorage> FileSystemServer<DS> {
    pub fn new(data_storage: DS) -> Result<Self> {
        Self::with_services(data_storage, Arc::new(EnglishCollation), Arc::new(SystemClock))
    }

    /// Mounts with an explicit collation service and clock; `new` defaults
    /// to English collation and the host clock.
    pub fn with_services(
        data_storage: DS,
        collation: Arc<dyn UnicodeCollation + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self> {
        Ok(Self {
            volume: Mutex::new(Volume::mount(data_storage, collation, clock)?),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Volume<DS>> {
        // A panicked operation leaves state the sticky errors and dirty
        // flags already describe; poisoning adds nothing.
        self.volume.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tears the volume down. Must not wait on the lock (the caller may be
    /// reacting to a media event); a busy volume fails with access denied.
    pub fn unmount(&self) -> Result<()> {
        let mut volume = match self.volume.try_lock() {
            Ok(volume) => volume,
            Err(_) => return Err(Error::Fs(FsError::AccessDenied)),
        };
        volume.unmount()
    }
}

impl<DS: DataStorage> Volume<DS> {
    /// Opens `file_name` relative to an open file, creating the missing
    /// final component when the open mode allows it.
    fn ofile_open(
        &mut self,
        ofile: OFileId,
        file_name: &str,
        open_mode: OpenMode,
        attributes: FileAttributes,
    ) -> Result<IFileId> {
        let write_mode = open_mode.contains(OpenMode::WRITE);
        if self.read_only && write_mode {
            return Err(Error::Fs(FsError::WriteProtected));
        }
        if let Some(error) = self.ofiles[ofile].error {
            return Err(error);
        }

        let (mut located, remaining) = self.locate_ofile(ofile, file_name, attributes.bits())?;
        if let Some(new_file_name) = remaining {
            if !open_mode.contains(OpenMode::CREATE) {
                return Err(Error::Fs(FsError::NotFound));
            }

            let dir_ent = self.create_dir_ent(located, &new_file_name, attributes.bits())?;
            located = self.open_dir_ent(Some(located), Some(dir_ent))?;
            if self.ofiles[located].is_directory() {
                self.create_dot_dir_ents(located)?;
            }
        }

        // A read-only file refuses write handles; directories accept them
        // for the sake of deletion.
        let file_attributes = self.dirent_of(located).entry.attributes;
        if file_attributes & ATTR_READ_ONLY != 0
            && file_attributes & ATTR_DIRECTORY == 0
            && write_mode
        {
            return Err(Error::Fs(FsError::AccessDenied));
        }

        let ifile = self.allocate_ifile(located, !write_mode);
        self.ofile_flush(located)?;
        Ok(ifile)
    }
}

impl<DS: DataStorage> FileSystem for FileSystemServer<DS> {
    fn open_volume(&self) -> Result<FileId> {
        let mut volume = self.lock();
        let status = match volume.open_dir_ent(None, None) {
            Ok(root) => Ok(volume.allocate_ifile(root, false)),
            Err(error) => Err(error),
        };
        let root = volume.root;
        volume.cleanup_volume(root, status.map(|_| ()))?;
        status.map(|ifile| FileId(ifile as u64))
    }

    fn open(
        &self,
        file: FileId,
        path: &str,
        open_mode: OpenMode,
        attributes: FileAttributes,
    ) -> Result<FileId> {
        match open_mode {
            mode if mode == OpenMode::READ
                || mode == OpenMode::READ | OpenMode::WRITE
                || mode == OpenMode::READ | OpenMode::WRITE | OpenMode::CREATE => {}
            _ => return Err(Error::Fs(FsError::InvalidParameter)),
        }
        if !FileAttributes::VALID.contains(attributes) {
            return Err(Error::Fs(FsError::InvalidParameter));
        }
        if open_mode.contains(OpenMode::CREATE) && attributes.contains(FileAttributes::READ_ONLY) {
            return Err(Error::Fs(FsError::InvalidParameter));
        }

        let mut volume = self.lock();
        let ifile = volume.ifile_id(file)?;
        let ofile = volume.ifiles[ifile].ofile;

        let status = volume.ofile_open(ofile, path, open_mode, attributes);
        volume.cleanup_volume(None, status.map(|_| ()))?;
        status.map(|ifile| FileId(ifile as u64))
    }

    fn close(&self, file: FileId) {
        let mut volume = self.lock();
        let Ok(ifile) = volume.ifile_id(file) else {
            return;
        };
        let ofile = volume.ifiles[ifile].ofile;
        volume.ifile_close(ifile);
        let _ = volume.cleanup_volume(Some(ofile), Ok(()));
    }

    fn delete(&self, file: FileId) -> Result<()> {
        let mut volume = self.lock();
        let ifile = volume.ifile_id(file)?;
        let ofile = volume.ifiles[ifile].ofile;

        let status = delete_ofile(&mut volume, ifile, ofile);
        volume.ifile_close(ifile);
        // Precondition failures keep their status; a failure of the
        // removal itself degrades to the delete warning.
        volume.cleanup_volume(None, status).map_err(|error| match error {
            Error::Fs(FsError::WriteProtected) | Error::Fs(FsError::AccessDenied) => error,
            _ => Error::Fs(FsError::DeleteFailure),
        })
    }

    fn read(&self, file: FileId, buffer: &mut [u8]) -> Result<usize> {
        let mut volume = self.lock();
        let ifile = volume.ifile_id(file)?;
        let ofile = volume.ifiles[ifile].ofile;

        if volume.ofiles[ofile].is_directory() {
            return Err(Error::Fs(FsError::Unsupported));
        }
        match volume.ofiles[ofile].error {
            Some(Error::Fs(FsError::NotFound)) => return Err(Error::Io(IoError::Device)),
            Some(error) => return Err(error),
            None => {}
        }

        let position = volume.ifiles[ifile].position;
        let file_size = volume.ofiles[ofile].file_size as u64;
        if position > file_size {
            return Err(Error::Io(IoError::Device));
        }

        let length = buffer.len().min((file_size - position) as usize);
        let (transferred, status) =
            volume.read_ofile_data(ofile, position as u32, &mut buffer[..length]);
        volume.ifiles[ifile].position += transferred as u64;
        if let Err(error) = status {
            volume.cleanup_volume(Some(ofile), Err(error))?;
        }
        Ok(transferred)
    }

    fn read_entry(&self, file: FileId) -> Result<Option<FileInfo>> {
        let mut volume = self.lock();
        let ifile = volume.ifile_id(file)?;
        let ofile = volume.ifiles[ifile].ofile;

        if !volume.ofiles[ofile].is_directory() {
            return Err(Error::Fs(FsError::Unsupported));
        }
        match volume.ofiles[ofile].error {
            Some(Error::Fs(FsError::NotFound)) => return Err(Error::Io(IoError::Device)),
            Some(error) => return Err(error),
            None => {}
        }

        match volume.ifile_read_dir(ifile) {
            Ok(info) => Ok(info),
            Err(error) => {
                volume.cleanup_volume(Some(ofile), Err(error))?;
                Err(error)
            }
        }
    }

    fn write(&self, file: FileId, buffer: &[u8]) -> Result<usize> {
        let mut volume = self.lock();
        let ifile = volume.ifile_id(file)?;
        let ofile = volume.ifiles[ifile].ofile;

        if volume.ofiles[ofile].is_directory() {
            return Err(Error::Fs(FsError::Unsupported));
        }
        match volume.ofiles[ofile].error {
            Some(Error::Fs(FsError::NotFound)) => return Err(Error::Io(IoError::Device)),
            Some(error) => return Err(error),
            None => {}
        }
        if volume.read_only {
            return Err(Error::Fs(FsError::WriteProtected));
        }
        if volume.ifiles[ifile].read_only {
            return Err(Error::Fs(FsError::AccessDenied));
        }

        let position = volume.ifiles[ifile].position;
        let end_position = position + buffer.len() as u64;
        if end_position > volume.ofiles[ofile].file_size as u64 {
            if let Err(error) = volume.grow_eof(ofile, end_position) {
                // The volume may have filled up mid-growth; whatever space
                // was found is kept and filled before the error goes out.
                let grown_size = volume.ofiles[ofile].file_size as u64;
                if error == Error::Fs(FsError::VolumeFull) && grown_size > position {
                    volume.update_dir_ent_cluster_size_info(ofile);
                    let length = (grown_size - position) as usize;
                    let (_, _) = volume.write_ofile_data(ofile, position as u32, &buffer[..length]);
                }
                let _ = volume.ofile_flush(ofile);
                return volume.cleanup_volume(None, Err(error)).map(|()| 0);
            }
            volume.update_dir_ent_cluster_size_info(ofile);
        }

        let (transferred, status) = volume.write_ofile_data(ofile, position as u32, buffer);
        volume.ifiles[ifile].position += transferred as u64;
        if let Err(error) = status {
            volume.cleanup_volume(Some(ofile), Err(error))?;
        }
        Ok(transferred)
    }

    fn position(&self, file: FileId) -> Result<u64> {
        let volume = self.lock();
        let ifile = volume.ifile_id(file)?;
        let ofile = volume.ifiles[ifile].ofile;

        if volume.ofiles[ofile].error == Some(Error::Fs(FsError::NotFound)) {
            return Err(Error::Io(IoError::Device));
        }
        // A directory position is not meaningful to the caller.
        if volume.ofiles[ofile].is_directory() {
            return Err(Error::Fs(FsError::Unsupported));
        }
        Ok(volume.ifiles[ifile].position)
    }

    fn set_position(&self, file: FileId, position: u64) -> Result<()> {
        let mut volume = self.lock();
        let ifile = volume.ifile_id(file)?;
        let ofile = volume.ifiles[ifile].ofile;

        if volume.ofiles[ofile].error == Some(Error::Fs(FsError::NotFound)) {
            return Err(Error::Io(IoError::Device));
        }

        // Only a rewind is defined for directories.
        if volume.ofiles[ofile].is_directory() {
            if position != 0 {
                return Err(Error::Fs(FsError::Unsupported));
            }
            volume.reset_odir_cursor(ofile);
        }

        volume.ifiles[ifile].position = if position == u64::MAX {
            volume.ofiles[ofile].file_size as u64
        } else {
            position
        };
        Ok(())
    }

    fn info(&self, file: FileId) -> Result<FileInfo> {
        let mut volume = self.lock();
        let ifile = volume.ifile_id(file)?;
        let ofile = volume.ifiles[ifile].ofile;

        match volume.ofiles[ofile].error {
            Some(Error::Fs(FsError::NotFound)) => return Err(Error::Io(IoError::Device)),
            Some(error) => return Err(error),
            None => {}
        }

        let info = volume.get_file_info(ofile);
        volume.cleanup_volume(None, Ok(()))?;
        Ok(info)
    }

    fn set_info(&self, file: FileId, info: &FileInfo) -> Result<()> {
        let mut volume = self.lock();
        let ifile = volume.ifile_id(file)?;
        let ofile = volume.ifiles[ifile].ofile;

        match volume.ofiles[ofile].error {
            Some(Error::Fs(FsError::NotFound)) => return Err(Error::Io(IoError::Device)),
            Some(error) => return Err(error),
            None => {}
        }
        if volume.read_only {
            return Err(Error::Fs(FsError::WriteProtected));
        }

        let status = volume.set_file_info(ifile, ofile, info);
        volume.cleanup_volume(None, status)
    }

    fn volume_info(&self, file: FileId) -> Result<FileSystemInfo> {
        let mut volume = self.lock();
        volume.ifile_id(file)?;

        let info = volume.get_volume_info();
        volume.cleanup_volume(None, Ok(()))?;
        Ok(info)
    }

    fn set_volume_info(&self, file: FileId, info: &FileSystemInfo) -> Result<()> {
        self.set_volume_label(file, &info.volume_label)
    }

    fn volume_label(&self, file: FileId) -> Result<String> {
        let mut volume = self.lock();
        volume.ifile_id(file)?;

        match volume.get_volume_entry() {
            Ok(label) => {
                volume.cleanup_volume(None, Ok(()))?;
                Ok(label)
            }
            Err(error) => {
                volume.cleanup_volume(None, Err(error))?;
                Err(error)
            }
        }
    }

    fn set_volume_label(&self, file: FileId, label: &str) -> Result<()> {
        let mut volume = self.lock();
        volume.ifile_id(file)?;
        if volume.read_only {
            return Err(Error::Fs(FsError::WriteProtected));
        }

        let status = volume.set_volume_entry(label);
        volume.cleanup_volume(None, status)
    }

    fn flush(&self, file: FileId) -> Result<()> {
        let mut volume = self.lock();
        let ifile = volume.ifile_id(file)?;
        let ofile = volume.ifiles[ifile].ofile;

        if let Some(error) = volume.ofiles[ofile].error {
            return Err(error);
        }
        if volume.read_only {
            return Err(Error::Fs(FsError::WriteProtected));
        }
        if volume.ifiles[ifile].read_only {
            return Err(Error::Fs(FsError::AccessDenied));
        }

        let status = volume.ofile_flush(ofile);
        volume.cleanup_volume(Some(ofile), status)
    }
}

fn delete_ofile<DS: DataStorage>(
    volume: &mut Volume<DS>,
    ifile: IFileId,
    ofile: OFileId,
) -> Result<()> {
    if volume.ifiles[ifile].read_only {
        return Err(Error::Fs(FsError::WriteProtected));
    }
    let Some(parent) = volume.ofiles[ofile].parent else {
        // The root cannot be deleted.
        return Err(Error::Fs(FsError::AccessDenied));
    };
    match volume.ofiles[ofile].error {
        // Already deleted through another handle.
        Some(Error::Fs(FsError::NotFound)) => return Ok(()),
        Some(error) => return Err(error),
        None => {}
    }

    // A directory must hold nothing but its dot entries.
    if volume.ofiles[ofile].is_directory() {
        volume.reset_odir_cursor(ofile);
        for round in 0..3 {
            let dir_ent = volume.get_next_dir_ent(ofile)?;
            let expected = match round {
                0 | 1 => dir_ent
                    .map(|id| volume.odir(ofile).dir_ents[id].is_dot_dir_ent())
                    .unwrap_or(false),
                _ => dir_ent.is_none(),
            };
            if !expected {
                return Err(Error::Fs(FsError::AccessDenied));
            }
        }
    }

    // Return the file's space, drop its entry and poison remaining
    // handles.
    let _ = volume.truncate_ofile(ofile, 0);
    let dir_ent = volume.ofiles[ofile]
        .dir_ent
        .ok_or(Error::Fs(FsError::Inconsistent))?;
    volume.remove_dir_ent(parent, dir_ent)?;
    volume.ofiles[ofile].error = Some(Error::Fs(FsError::NotFound));
    Ok(())
}
