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

use crate::{dir::ODir, file::OFileId, volume::Volume};

pub(crate) const MAX_DIR_CACHE_COUNT: usize = 8;

impl<DS: DataStorage> Volume<DS> {
    /// Attaches a directory structure to a freshly opened directory. A
    /// cached one (keyed by the starting cluster) comes back with all
    /// previously parsed entries and hash tables intact.
    pub(crate) fn request_odir(&mut self, ofile: OFileId) {
        let dir_cache_tag = self.ofiles[ofile].file_cluster;
        let cached = self
            .dir_cache
            .iter()
            .position(|odir| odir.dir_cache_tag == dir_cache_tag)
            .map(|at| self.dir_cache.remove(at));
        self.ofiles[ofile].odir = Some(cached.unwrap_or_else(|| Box::new(ODir::new())));
    }

    /// Parks the directory structure of a closing directory in the cache,
    /// front of the list, evicting the least recently used entry beyond
    /// the capacity. The structure of a deleted directory is dropped.
    pub(crate) fn discard_odir(&mut self, ofile: OFileId, invalid: bool) {
        let Some(mut odir) = self.ofiles[ofile].odir.take() else {
            return;
        };
        if invalid {
            return;
        }

        odir.dir_cache_tag = self.ofiles[ofile].file_cluster;
        self.dir_cache.insert(0, odir);
        if self.dir_cache.len() > MAX_DIR_CACHE_COUNT {
            self.dir_cache.pop();
        }
    }

    pub(crate) fn cleanup_odir_cache(&mut self) {
        self.dir_cache.clear();
    }
}
