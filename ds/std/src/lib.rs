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

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::Path,
    sync::{Arc, Mutex},
};

use hyrax_ds::{DataStorage, Error, IoError, Result};
use log::error;

fn from_io_error(error: io::Error) -> Error {
    error!("Storage IO failed: {error}");
    Error::Io(IoError::Device)
}

/// Storage backed by a host file or block device node.
pub struct DataStorageServer {
    file: File,
    read_only: bool,
}

impl DataStorageServer {
    pub fn new(file_path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(file_path)
            .map_err(from_io_error)?;
        Ok(Self {
            file,
            read_only: false,
        })
    }

    pub fn new_read_only(file_path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(file_path).map_err(from_io_error)?;
        Ok(Self {
            file,
            read_only: true,
        })
    }
}

impl DataStorage for DataStorageServer {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buffer, offset)
            .map_err(from_io_error)
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::Io(IoError::ReadOnly));
        }
        self.file
            .write_all_at(buffer, offset)
            .map_err(from_io_error)
    }

    fn flush(&self) -> Result<()> {
        self.file.sync_data().map_err(from_io_error)
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

/// In-memory storage. Clones share the same backing memory, which lets a
/// test hold onto the raw image while a file system server owns the storage.
#[derive(Clone)]
pub struct RamDisk {
    data: Arc<Mutex<Vec<u8>>>,
    read_only: bool,
}

impl RamDisk {
    pub fn new(size: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0; size])),
            read_only: false,
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `buffer.len()` bytes at `offset` out of the backing memory,
    /// bypassing whoever owns the storage.
    pub fn peek(&self, offset: u64, buffer: &mut [u8]) {
        let data = self.data.lock().unwrap();
        buffer.copy_from_slice(&data[offset as usize..offset as usize + buffer.len()]);
    }
}

impl DataStorage for RamDisk {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let data = self.data.lock().unwrap();
        let offset = offset as usize;
        let Some(source) = data.get(offset..offset + buffer.len()) else {
            return Err(Error::Io(IoError::Device));
        };
        buffer.copy_from_slice(source);
        Ok(())
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::Io(IoError::ReadOnly));
        }
        let mut data = self.data.lock().unwrap();
        let offset = offset as usize;
        let Some(destination) = data.get_mut(offset..offset + buffer.len()) else {
            return Err(Error::Io(IoError::Device));
        };
        destination.copy_from_slice(buffer);
        Ok(())
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_disk_round_trip() {
        let disk = RamDisk::new(4096);
        disk.write(512, b"hyrax").unwrap();

        let mut buffer = [0; 5];
        disk.read(512, &mut buffer).unwrap();
        assert_eq!(&buffer, b"hyrax");
    }

    #[test]
    fn ram_disk_clones_share_memory() {
        let disk = RamDisk::new(1024);
        let alias = disk.clone();
        disk.write(0, &[0xAA]).unwrap();

        let mut buffer = [0];
        alias.peek(0, &mut buffer);
        assert_eq!(buffer, [0xAA]);
    }

    #[test]
    fn ram_disk_rejects_out_of_range() {
        let disk = RamDisk::new(16);
        let mut buffer = [0; 32];
        assert_eq!(disk.read(0, &mut buffer), Err(Error::Io(IoError::Device)));
    }

    #[test]
    fn read_only_ram_disk_rejects_writes() {
        let disk = RamDisk::new(16).read_only();
        assert_eq!(disk.write(0, &[1]), Err(Error::Io(IoError::ReadOnly)));
    }
}
