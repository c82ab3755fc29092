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

mod common;

use common::*;
use hyrax_fs::{FileAttributes, FileSystem, OpenMode};

const RWC: OpenMode = OpenMode::READ.union(OpenMode::WRITE).union(OpenMode::CREATE);

#[test]
fn mounts_and_serves_the_chained_root() {
    let fs = server(fat32_image());
    let root = fs.open_volume().unwrap();

    // The root is a cluster chain, not a fixed area.
    assert!(fs.read_entry(root).unwrap().is_none());

    let file = fs.open(root, "\\kernel.img", RWC, FileAttributes::empty()).unwrap();
    fs.write(file, &[0xC3; 3000]).unwrap();
    fs.close(file);

    fs.set_position(root, 0).unwrap();
    let entry = fs.read_entry(root).unwrap().unwrap();
    assert_eq!(entry.file_name, "kernel.img");
    assert_eq!(entry.file_size, 3000);
}

#[test]
fn fs_info_sector_tracks_free_clusters() {
    let disk = fat32_image();
    let fs = server(disk.clone());
    let root = fs.open_volume().unwrap();

    assert_eq!(
        fs.volume_info(root).unwrap().free_space,
        FAT32_FREE_CLUSTERS as u64 * SECTOR as u64
    );

    // Six 512-byte clusters for the file.
    let file = fs.open(root, "\\f", RWC, FileAttributes::empty()).unwrap();
    fs.write(file, &[1; 6 * SECTOR]).unwrap();
    fs.close(file);

    // The hint sector was written back with the allocation accounted.
    assert_eq!(
        peek_u32(&disk, FAT32_FS_INFO_OFFSET + 488),
        FAT32_FREE_CLUSTERS - 6
    );
    // And the volume was marked clean again (bit 27 set).
    assert_ne!(peek_u32(&disk, FAT32_FAT_OFFSET + 4) & 0x0800_0000, 0);
}

#[test]
fn cluster_high_word_is_used() {
    let disk = fat32_image();
    let fs = server(disk.clone());
    let root = fs.open_volume().unwrap();

    // Push the allocator past 0xFFFF so new clusters need the high word.
    let filler = fs.open(root, "\\filler", RWC, FileAttributes::empty()).unwrap();
    fs.write(filler, &vec![0; 0x10000 * SECTOR]).unwrap();

    let file = fs.open(root, "\\high", RWC, FileAttributes::empty()).unwrap();
    fs.write(file, b"beyond the first 65536 clusters").unwrap();
    fs.close(file);
    fs.close(filler);
    fs.close(root);

    // Find the record and check its cluster words point past 0xFFFF.
    let records = raw_records(&disk, FAT32_DATA_OFFSET, 16);
    let record = records
        .iter()
        .find(|record| &record[..11] == b"HIGH       ")
        .expect("record");
    let cluster_high = u16::from_le_bytes(record[20..22].try_into().unwrap());
    assert!(cluster_high > 0);

    // And the data reads back across a remount.
    let fs = server(disk);
    let root = fs.open_volume().unwrap();
    let file = fs
        .open(root, "\\high", OpenMode::READ, FileAttributes::empty())
        .unwrap();
    let mut buffer = [0; 31];
    assert_eq!(fs.read(file, &mut buffer).unwrap(), 31);
    assert_eq!(&buffer, b"beyond the first 65536 clusters");
}

#[test]
fn root_directory_grows_by_clusters() {
    let disk = fat32_image();
    let fs = server(disk.clone());
    let root = fs.open_volume().unwrap();

    // One 512-byte root cluster holds 16 slots; force several expansions.
    for index in 0..64 {
        let file = fs
            .open(root, &format!("\\E{index}"), RWC, FileAttributes::empty())
            .unwrap();
        fs.close(file);
    }

    fs.set_position(root, 0).unwrap();
    let count = std::iter::from_fn(|| fs.read_entry(root).unwrap()).count();
    assert_eq!(count, 64);

    // The root chain now spans multiple clusters.
    assert_ne!(
        peek_u32(&disk, FAT32_FAT_OFFSET + 2 * 4) & 0x0FFF_FFFF,
        0x0FFF_FFFF
    );
}
