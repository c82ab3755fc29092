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

/// Byte-addressed storage beneath a file system. Reads and writes either
/// transfer the whole buffer or fail, there is no short IO.
///
/// Absent media is reported as [`IoError::NoMedia`], a change of media since
/// the storage was opened as [`IoError::MediaChanged`].
pub trait DataStorage {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()>;

    /// Commits buffered writes to the physical medium.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn read_only(&self) -> bool {
        false
    }

    /// Identifies the medium currently present, for detecting media changes
    /// on removable devices.
    fn media_id(&self) -> u32 {
        0
    }
}
