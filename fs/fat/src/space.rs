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
use log::error;

use crate::{
    file::OFileId,
    table::{end_of_chain, CLUSTER_FREE, CLUSTER_LAST, CLUSTER_SPECIAL, MIN_CLUSTER},
    volume::Volume,
};

/// A file may not grow past 4 GiB - 1.
pub(crate) const MAX_FILE_SIZE: u64 = u32::MAX as u64;

impl<DS: DataStorage> Volume<DS> {
    /// Seeks the open file to `position` and computes the contiguous run
    /// reachable from there, bounded by `pos_limit`. The walk resumes from
    /// the cached current cluster whenever the position moved forward.
    pub(crate) fn ofile_position(&mut self, ofile: OFileId, position: u32, pos_limit: u64) -> Result<()> {
        let cluster_size = self.cluster_size as u64;
        let position = position as u64;

        // The FAT12/FAT16 root is a fixed area, not a cluster chain.
        if self.ofiles[ofile].is_fixed_root_dir {
            let file = &mut self.ofiles[ofile];
            file.pos_disk = self.root_pos + position;
            file.pos_rem = file.file_size as u64 - position;
            return Ok(());
        }

        let file = &self.ofiles[ofile];
        let mut cluster = file.file_current_cluster;
        let mut start_pos = file.position as u64;
        if position < start_pos || file.file_cluster == cluster {
            start_pos = 0;
            cluster = file.file_cluster;
        }

        while start_pos + cluster_size <= position {
            start_pos += cluster_size;
            if cluster == CLUSTER_FREE || cluster >= CLUSTER_SPECIAL {
                error!("Cluster chain corrupt");
                return Err(Error::Fs(FsError::Inconsistent));
            }

            cluster = self.fat_entry(cluster);
        }

        if cluster < MIN_CLUSTER {
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let pos_disk = self.first_cluster_pos
            + ((cluster - MIN_CLUSTER) as u64) * cluster_size
            + position
            - start_pos;

        // Extend through consecutive successor clusters up to the limit.
        let mut run = start_pos + cluster_size - position;
        if !end_of_chain(cluster) {
            let mut next = cluster;
            while self.fat_entry(next) == next + 1 && run < pos_limit {
                run += cluster_size;
                next += 1;
            }
        }

        let file = &mut self.ofiles[ofile];
        file.pos_disk = pos_disk;
        file.file_current_cluster = cluster;
        file.position = start_pos as u32;
        file.pos_rem = run;
        Ok(())
    }

    /// Grows the file to `new_size` bytes, allocating and linking clusters
    /// one at a time.
    ///
    /// When the volume fills up mid-growth the chain is terminated at the
    /// last successful allocation and the file keeps the partially grown
    /// size, so a caller can still use the space that was found. Any other
    /// failure is undone with [`Self::shrink_eof`].
    pub(crate) fn grow_eof(&mut self, ofile: OFileId, new_size: u64) -> Result<()> {
        if new_size > MAX_FILE_SIZE {
            return Err(Error::Fs(FsError::Unsupported));
        }

        let cluster_alignment = self.cluster_alignment;
        let mut current_clusters = self.size_to_clusters(self.ofiles[ofile].file_size as u64);
        let new_clusters = self.size_to_clusters(new_size);

        if current_clusters < new_clusters {
            // Find the tail if it is not known yet, verifying the chain
            // length against the file size on the way.
            if self.ofiles[ofile].file_cluster != 0 && self.ofiles[ofile].file_last_cluster == 0 {
                let mut cluster = self.ofiles[ofile].file_cluster;
                let mut cluster_count = 0;
                while !end_of_chain(cluster) {
                    if cluster == CLUSTER_FREE || cluster >= CLUSTER_SPECIAL {
                        error!("Cluster chain corrupt");
                        return self.grow_failed(ofile, Error::Fs(FsError::Inconsistent));
                    }

                    cluster_count += 1;
                    self.ofiles[ofile].file_last_cluster = cluster;
                    cluster = self.fat_entry(cluster);
                }

                if cluster_count != current_clusters {
                    error!("Cluster chain does not match the file size");
                    return self.grow_failed(ofile, Error::Fs(FsError::Inconsistent));
                }
            }

            let mut last_cluster = self.ofiles[ofile].file_last_cluster;
            let mut grown = false;
            while current_clusters < new_clusters {
                let new_cluster = self.allocate_cluster();
                if end_of_chain(new_cluster) {
                    if last_cluster != CLUSTER_FREE {
                        self.set_fat_entry(last_cluster, CLUSTER_LAST)?;
                        self.ofiles[ofile].file_last_cluster = last_cluster;
                    }

                    if grown {
                        let file = &mut self.ofiles[ofile];
                        file.file_size = current_clusters << cluster_alignment;
                        file.dirty = true;
                    }
                    return Err(Error::Fs(FsError::VolumeFull));
                }

                if last_cluster != 0 {
                    self.set_fat_entry(last_cluster, new_cluster)?;
                } else {
                    let file = &mut self.ofiles[ofile];
                    file.file_cluster = new_cluster;
                    file.file_current_cluster = new_cluster;
                }

                last_cluster = new_cluster;
                current_clusters += 1;
                grown = true;
            }

            self.set_fat_entry(last_cluster, CLUSTER_LAST)?;
            self.ofiles[ofile].file_last_cluster = last_cluster;
        }

        let file = &mut self.ofiles[ofile];
        file.file_size = new_size as u32;
        file.dirty = true;
        Ok(())
    }

    fn grow_failed(&mut self, ofile: OFileId, error: Error) -> Result<()> {
        // Best effort, the original failure is what the caller needs.
        let _ = self.shrink_eof(ofile);
        Err(error)
    }

    /// Truncates the cluster chain to what the file size needs and frees
    /// the remainder.
    pub(crate) fn shrink_eof(&mut self, ofile: OFileId) -> Result<()> {
        let new_clusters = self.size_to_clusters(self.ofiles[ofile].file_size as u64);

        let mut cluster = self.ofiles[ofile].file_cluster;
        let mut last_cluster = CLUSTER_FREE;

        if new_clusters != 0 {
            for _ in 0..new_clusters {
                if cluster == CLUSTER_FREE || cluster >= CLUSTER_SPECIAL {
                    error!("Cluster chain corrupt");
                    return Err(Error::Fs(FsError::Inconsistent));
                }

                last_cluster = cluster;
                cluster = self.fat_entry(cluster);
            }

            self.set_fat_entry(last_cluster, CLUSTER_LAST)?;
        } else {
            if cluster == CLUSTER_FREE {
                return Ok(());
            }
            self.ofiles[ofile].file_cluster = CLUSTER_FREE;
        }

        // Force a position recomputation from the chain head.
        let file = &mut self.ofiles[ofile];
        file.file_current_cluster = file.file_cluster;
        file.file_last_cluster = last_cluster;
        file.dirty = true;

        self.free_clusters(cluster)
    }

    /// Physical size of a directory, from walking its chain. Returns zero
    /// on a corrupt chain, and for the missing start cluster some media
    /// leave in ".." entries.
    pub(crate) fn physical_dir_size(&mut self, mut cluster: u32) -> u32 {
        let mut size = 0;
        if cluster != 0 {
            while !end_of_chain(cluster) {
                if cluster == CLUSTER_FREE || cluster >= CLUSTER_SPECIAL {
                    error!("Cluster chain corrupt");
                    return 0;
                }

                size += self.cluster_size;
                cluster = self.fat_entry(cluster);
            }
        }
        size
    }

    /// Physical size of a file: the real size rounded up to a cluster.
    pub(crate) fn physical_file_size(&self, real_size: u32) -> u64 {
        let cluster_size_mask = self.cluster_size as u64 - 1;
        (real_size as u64 + cluster_size_mask) & !cluster_size_mask
    }
}
