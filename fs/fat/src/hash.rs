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

use hyrax_fs::collation::UnicodeCollation;

use crate::{
    dir::{DirEntId, ODir},
    dirent::FAT_NAME_LEN,
};

pub(crate) const HASH_TABLE_SIZE: usize = 0x400;
const HASH_TABLE_MASK: usize = HASH_TABLE_SIZE - 1;

/// Long names hash case-insensitively: the upcased UTF-16 rendering is
/// CRC32ed, like the short-name bytes.
fn hash_long_name(file_string: &str, collation: &dyn UnicodeCollation) -> usize {
    let up_cased = collation.str_upr(file_string);
    let mut bytes = Vec::with_capacity(up_cased.len() * 2);
    for unit in up_cased.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    crc32fast::hash(&bytes) as usize & HASH_TABLE_MASK
}

fn hash_short_name(file_name: &[u8; FAT_NAME_LEN]) -> usize {
    crc32fast::hash(file_name) as usize & HASH_TABLE_MASK
}

impl ODir {
    pub fn long_name_search(
        &self,
        file_string: &str,
        collation: &dyn UnicodeCollation,
    ) -> Option<DirEntId> {
        let mut node = self.long_name_hash_table[hash_long_name(file_string, collation)];
        while let Some(id) = node {
            let dir_ent = &self.dir_ents[id];
            if collation.stri_cmp(file_string, &dir_ent.file_string) == Ordering::Equal {
                return Some(id);
            }
            node = dir_ent.long_name_forward_link;
        }
        None
    }

    pub fn short_name_search(&self, file_name: &[u8; FAT_NAME_LEN]) -> Option<DirEntId> {
        let mut node = self.short_name_hash_table[hash_short_name(file_name)];
        while let Some(id) = node {
            let dir_ent = &self.dir_ents[id];
            if &dir_ent.entry.file_name == file_name {
                return Some(id);
            }
            node = dir_ent.short_name_forward_link;
        }
        None
    }

    pub fn insert_to_hash_table(&mut self, id: DirEntId, collation: &dyn UnicodeCollation) {
        let index = hash_short_name(&self.dir_ents[id].entry.file_name);
        self.dir_ents[id].short_name_forward_link = self.short_name_hash_table[index];
        self.short_name_hash_table[index] = Some(id);

        let index = hash_long_name(&self.dir_ents[id].file_string, collation);
        self.dir_ents[id].long_name_forward_link = self.long_name_hash_table[index];
        self.long_name_hash_table[index] = Some(id);
    }

    pub fn delete_from_hash_table(&mut self, id: DirEntId, collation: &dyn UnicodeCollation) {
        let index = hash_short_name(&self.dir_ents[id].entry.file_name);
        let next = self.dir_ents[id].short_name_forward_link;
        let mut node = self.short_name_hash_table[index];
        if node == Some(id) {
            self.short_name_hash_table[index] = next;
        } else {
            while let Some(previous) = node {
                if self.dir_ents[previous].short_name_forward_link == Some(id) {
                    self.dir_ents[previous].short_name_forward_link = next;
                    break;
                }
                node = self.dir_ents[previous].short_name_forward_link;
            }
        }

        let index = hash_long_name(&self.dir_ents[id].file_string, collation);
        let next = self.dir_ents[id].long_name_forward_link;
        let mut node = self.long_name_hash_table[index];
        if node == Some(id) {
            self.long_name_hash_table[index] = next;
        } else {
            while let Some(previous) = node {
                if self.dir_ents[previous].long_name_forward_link == Some(id) {
                    self.dir_ents[previous].long_name_forward_link = next;
                    break;
                }
                node = self.dir_ents[previous].long_name_forward_link;
            }
        }
    }
}
