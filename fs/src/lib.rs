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

pub use hyrax_err::*;

pub mod collation;
pub mod time;

use time::Timestamp;

bitflags::bitflags! {
    /// Open modes of the file protocol. The only valid combinations are
    /// `READ`, `READ | WRITE` and `READ | WRITE | CREATE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u64 {
        const READ = 0x0000000000000001;
        const WRITE = 0x0000000000000002;
        const CREATE = 0x8000000000000000;
    }
}

bitflags::bitflags! {
    /// File attributes as stored in a directory entry.
    ///
    /// `VOLUME_ID` marks the volume label entry in the root directory and is
    /// never valid on the external surface, which is what `VALID` masks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;

        const VALID = 0x37;
    }
}

impl Default for FileAttributes {
    fn default() -> Self {
        Self::empty()
    }
}

/// Handle to an open file or directory. Every `open`/`open_volume` returns a
/// fresh handle with its own position; handles referring to the same
/// underlying object share its contents and metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub file_size: u64,
    pub physical_size: u64,
    pub create_time: Timestamp,
    pub last_access_time: Timestamp,
    pub modification_time: Timestamp,
    pub attributes: FileAttributes,
    /// For `set_info` this may also be a relative path, which renames the
    /// file into the directory the path resolves in.
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileSystemInfo {
    pub read_only: bool,
    pub volume_size: u64,
    pub free_space: u64,
    pub block_size: u32,
    pub volume_label: String,
}

/// The file protocol: a hierarchical file interface over one mounted volume.
///
/// Positions are per handle. Seeking a directory is only valid to position 0
/// (which rewinds enumeration), and `u64::MAX` seeks a file to its end.
pub trait FileSystem {
    /// Opens the root directory of the volume.
    fn open_volume(&self) -> Result<FileId>;

    fn open(
        &self,
        file: FileId,
        path: &str,
        open_mode: OpenMode,
        attributes: FileAttributes,
    ) -> Result<FileId>;

    /// Closing flushes the file and always succeeds.
    fn close(&self, file: FileId);

    /// Deletes the object behind the handle and closes the handle. A
    /// directory must be empty. Failure to delete is reported as
    /// [`FsError::DeleteFailure`] with the handle closed regardless.
    fn delete(&self, file: FileId) -> Result<()>;

    /// Reads up to `buffer.len()` bytes at the handle position, returning
    /// how many bytes were read (clipped at end of file).
    fn read(&self, file: FileId, buffer: &mut [u8]) -> Result<usize>;

    /// Reads the next entry of a directory, or `None` when enumeration is
    /// complete.
    fn read_entry(&self, file: FileId) -> Result<Option<FileInfo>>;

    /// Writes `buffer` at the handle position, growing the file as needed,
    /// and returns how many bytes were written.
    fn write(&self, file: FileId, buffer: &[u8]) -> Result<usize>;

    fn position(&self, file: FileId) -> Result<u64>;

    fn set_position(&self, file: FileId, position: u64) -> Result<()>;

    fn info(&self, file: FileId) -> Result<FileInfo>;

    /// Applies attributes, times, size and (via `file_name`) rename.
    /// All-zero timestamps leave the corresponding time untouched.
    fn set_info(&self, file: FileId, info: &FileInfo) -> Result<()>;

    fn volume_info(&self, file: FileId) -> Result<FileSystemInfo>;

    /// Only the volume label can be changed through the file system info.
    fn set_volume_info(&self, file: FileId, info: &FileSystemInfo) -> Result<()>;

    fn volume_label(&self, file: FileId) -> Result<String>;

    fn set_volume_label(&self, file: FileId, label: &str) -> Result<()>;

    /// Commits the file, the volume free-space hint and both disk caches.
    fn flush(&self, file: FileId) -> Result<()>;
}
