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
use hyrax_fs::{
    time::Timestamp, Error, FileAttributes, FileInfo, FileSystem, FsError, IoError, OpenMode,
};

const RW: OpenMode = OpenMode::READ.union(OpenMode::WRITE);
const RWC: OpenMode = OpenMode::READ.union(OpenMode::WRITE).union(OpenMode::CREATE);

#[test]
fn create_write_read_round_trip() {
    let disk = fat16_image(100);
    let fs = server(disk.clone());
    let root = fs.open_volume().unwrap();

    let file = fs
        .open(root, "\\a.txt", RWC, FileAttributes::empty())
        .unwrap();
    assert_eq!(fs.write(file, b"hello").unwrap(), 5);
    fs.close(file);

    let file = fs.open(root, "\\a.txt", OpenMode::READ, FileAttributes::empty()).unwrap();
    let mut buffer = [0; 16];
    assert_eq!(fs.read(file, &mut buffer).unwrap(), 5);
    assert_eq!(&buffer[..5], b"hello");
    fs.close(file);

    // The directory lists one entry named a.txt with size 5.
    let entries: Vec<FileInfo> = std::iter::from_fn(|| fs.read_entry(root).unwrap()).collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_name, "a.txt");
    assert_eq!(entries[0].file_size, 5);
    assert_eq!(entries[0].physical_size, FAT16_CLUSTER_SIZE as u64);
    assert!(entries[0].attributes.contains(FileAttributes::ARCHIVE));

    // On disk: the 8.3 record `A       TXT` with both lower-case flags.
    let records = raw_records(&disk, FAT16_ROOT_OFFSET, 512);
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0][..11], b"A       TXT");
    assert_eq!(records[0][12], 0x18);
    assert_eq!(
        u32::from_le_bytes(records[0][28..32].try_into().unwrap()),
        5
    );
}

#[test]
fn long_names_and_directory_lifecycle() {
    let disk = fat16_image(100);
    let fs = server(disk.clone());
    let root = fs.open_volume().unwrap();

    let dir = fs.open(root, "\\d", RWC, FileAttributes::DIRECTORY).unwrap();
    let file = fs
        .open(root, "\\d\\longname with spaces.dat", RWC, FileAttributes::empty())
        .unwrap();
    fs.close(file);

    // The directory lists the dot entries and the long name.
    fs.set_position(dir, 0).unwrap();
    let names: Vec<String> = std::iter::from_fn(|| fs.read_entry(dir).unwrap())
        .map(|info| info.file_name)
        .collect();
    assert_eq!(names, [".", "..", "longname with spaces.dat"]);

    // On disk (the directory occupies the first data cluster): dots, two
    // long-name slots, then the 8.3 record.
    let records = raw_records(&disk, FAT16_DATA_OFFSET, 16);
    assert_eq!(&records[0][..11], b".          ");
    assert_eq!(&records[1][..11], b"..         ");
    assert_eq!(records[2][0], 2 | 0x40); // last slot, ordinal 2
    assert_eq!(records[2][11], 0x0F);
    assert_eq!(records[3][0], 1);
    assert_eq!(records[3][13], 0x65); // checksum of LONGNA~1DAT
    assert_eq!(&records[4][..11], b"LONGNA~1DAT");

    // Deleting a non-empty directory is refused.
    assert_eq!(
        fs.delete(dir),
        Err(Error::Fs(FsError::AccessDenied))
    );

    // Lookup by long name is case-insensitive.
    let file = fs
        .open(root, "\\d\\LONGNAME WITH SPACES.DAT", RW, FileAttributes::empty())
        .unwrap();
    fs.delete(file).unwrap();

    let dir = fs.open(root, "\\d", RW, FileAttributes::empty()).unwrap();
    fs.delete(dir).unwrap();
    assert_eq!(
        fs.open(root, "\\d", OpenMode::READ, FileAttributes::empty()),
        Err(Error::Fs(FsError::NotFound))
    );
}

#[test]
fn long_name_survives_remount() {
    let disk = fat16_image(100);
    {
        let fs = server(disk.clone());
        let root = fs.open_volume().unwrap();
        // Inner components are not created implicitly.
        let error = fs
            .open(root, "\\documents\\report final.txt", RWC, FileAttributes::empty())
            .map(|_| ())
            .unwrap_err();
        assert_eq!(error, Error::Fs(FsError::NotFound));

        fs.open(root, "\\documents", RWC, FileAttributes::DIRECTORY).unwrap();
        let file = fs
            .open(root, "\\documents\\report final.txt", RWC, FileAttributes::empty())
            .unwrap();
        fs.write(file, b"quarterly").unwrap();
        fs.close(file);
        fs.close(root);
    }

    let fs = server(disk);
    let root = fs.open_volume().unwrap();
    let file = fs
        .open(root, "\\documents\\Report Final.TXT", OpenMode::READ, FileAttributes::empty())
        .unwrap();
    assert_eq!(fs.info(file).unwrap().file_name, "report final.txt");
    let mut buffer = [0; 9];
    assert_eq!(fs.read(file, &mut buffer).unwrap(), 9);
    assert_eq!(&buffer, b"quarterly");
}

#[test]
fn volume_full_keeps_partial_growth() {
    let fs = server(fat16_image(100));
    let root = fs.open_volume().unwrap();

    let file = fs.open(root, "\\big", RWC, FileAttributes::empty()).unwrap();
    let buffer = vec![0xA5; 101 * FAT16_CLUSTER_SIZE];
    assert_eq!(fs.write(file, &buffer), Err(Error::Fs(FsError::VolumeFull)));

    // The 100 clusters that were found stay with the file.
    let info = fs.info(file).unwrap();
    assert_eq!(info.file_size, 100 * FAT16_CLUSTER_SIZE as u64);
    assert_eq!(fs.volume_info(file).unwrap().free_space, 0);

    // The found space holds the data that fit.
    fs.set_position(file, 0).unwrap();
    let mut readback = vec![0; FAT16_CLUSTER_SIZE];
    assert_eq!(fs.read(file, &mut readback).unwrap(), FAT16_CLUSTER_SIZE);
    assert!(readback.iter().all(|&byte| byte == 0xA5));

    // Truncation returns every cluster.
    let info = FileInfo {
        file_size: 0,
        file_name: "big".into(),
        ..fs.info(file).unwrap()
    };
    fs.set_info(file, &info).unwrap();
    assert_eq!(
        fs.volume_info(file).unwrap().free_space,
        100 * FAT16_CLUSTER_SIZE as u64
    );

    // Truncating an already empty file is a no-op.
    fs.set_info(file, &info).unwrap();
    assert_eq!(fs.info(file).unwrap().file_size, 0);
}

#[test]
fn failed_write_leaves_volume_dirty() {
    let disk = fat16_image(200);
    let faulty = FaultyDisk::new(disk.clone());
    let fs = server(faulty.clone());
    let root = fs.open_volume().unwrap();
    let file = fs.open(root, "\\big.bin", RWC, FileAttributes::empty()).unwrap();

    // The next device write is the bulk body of this transfer.
    faulty.fail_nth_write(1);
    let buffer = vec![0x5A; 64 * FAT16_CLUSTER_SIZE];
    assert_eq!(fs.write(file, &buffer), Err(Error::Io(IoError::Device)));

    // The open file is poisoned and the dirty flag stays on disk (bit 15
    // of FAT entry #1 clear).
    let mut scratch = [0; 1];
    assert_eq!(fs.read(file, &mut scratch), Err(Error::Io(IoError::Device)));
    assert_eq!(peek_u16(&disk, FAT16_FAT_OFFSET + 2) & 0x8000, 0);

    // A later mount still succeeds and sees the dirty flag untouched.
    fs.close(file);
    fs.close(root);
    drop(fs);
    let fs = server(disk.clone());
    let root = fs.open_volume().unwrap();
    assert!(fs.volume_info(root).is_ok());
    assert_eq!(peek_u16(&disk, FAT16_FAT_OFFSET + 2) & 0x8000, 0);
}

#[test]
fn clean_operations_clear_the_dirty_flag() {
    let disk = fat16_image(100);
    let fs = server(disk.clone());
    let root = fs.open_volume().unwrap();

    let file = fs.open(root, "\\a", RWC, FileAttributes::empty()).unwrap();
    fs.write(file, b"x").unwrap();
    // Reads and writes leave the caches and the flag to the next flush.
    fs.flush(file).unwrap();
    assert_ne!(peek_u16(&disk, FAT16_FAT_OFFSET + 2) & 0x8000, 0);
    fs.close(file);
    assert_ne!(peek_u16(&disk, FAT16_FAT_OFFSET + 2) & 0x8000, 0);
}

#[test]
fn short_name_collisions_switch_to_the_hashed_scheme() {
    let disk = fat16_image(200);
    let fs = server(disk.clone());
    let root = fs.open_volume().unwrap();

    for index in 0..6 {
        let path = format!("\\collide file {index}.txt");
        let file = fs.open(root, &path, RWC, FileAttributes::empty()).unwrap();
        fs.close(file);
    }
    fs.close(root);

    let records = raw_records(&disk, FAT16_ROOT_OFFSET, 512);
    let short_names: Vec<[u8; 11]> = records
        .iter()
        .filter(|record| record[11] != 0x0F && record[0] != 0xE5)
        .map(|record| record[..11].try_into().unwrap())
        .collect();
    assert_eq!(short_names.len(), 6);

    // Five numeric-tail names, then one hashed-scheme name.
    for (index, name) in short_names.iter().take(5).enumerate() {
        let expected = format!("COLLID~{}TXT", index + 1);
        assert_eq!(&name[..], expected.as_bytes());
    }
    let hashed = short_names[5];
    assert_eq!(&hashed[..2], b"CO");
    assert!(hashed[2..6]
        .iter()
        .all(|byte| byte.is_ascii_digit() || (b'A'..=b'F').contains(byte)));
    assert_eq!(&hashed[6..8], b"~1");
    assert_eq!(&hashed[8..11], b"TXT");
}

#[test]
fn handles_share_the_file_but_not_positions() {
    let fs = server(fat16_image(100));
    let root = fs.open_volume().unwrap();

    let writer = fs.open(root, "\\shared", RWC, FileAttributes::empty()).unwrap();
    let reader = fs.open(root, "\\shared", OpenMode::READ, FileAttributes::empty()).unwrap();

    fs.write(writer, b"0123456789").unwrap();
    assert_eq!(fs.position(writer).unwrap(), 10);

    // The second handle sees the bytes without an intervening flush, from
    // its own position.
    assert_eq!(fs.position(reader).unwrap(), 0);
    let mut buffer = [0; 10];
    assert_eq!(fs.read(reader, &mut buffer).unwrap(), 10);
    assert_eq!(&buffer, b"0123456789");
}

#[test]
fn delete_with_second_handle_open_poisons_it() {
    let fs = server(fat16_image(100));
    let root = fs.open_volume().unwrap();

    let first = fs.open(root, "\\doomed", RWC, FileAttributes::empty()).unwrap();
    let second = fs.open(root, "\\doomed", RW, FileAttributes::empty()).unwrap();
    fs.delete(first).unwrap();

    let mut buffer = [0; 1];
    assert_eq!(fs.read(second, &mut buffer), Err(Error::Io(IoError::Device)));
    // Deleting through the surviving handle reports success.
    fs.delete(second).unwrap();
}

#[test]
fn rename_via_set_info() {
    let fs = server(fat16_image(100));
    let root = fs.open_volume().unwrap();

    let file = fs.open(root, "\\old name.txt", RWC, FileAttributes::empty()).unwrap();
    fs.write(file, b"payload").unwrap();

    let info = FileInfo {
        file_name: "new name.txt".into(),
        ..fs.info(file).unwrap()
    };
    fs.set_info(file, &info).unwrap();
    fs.close(file);

    assert_eq!(
        fs.open(root, "\\old name.txt", OpenMode::READ, FileAttributes::empty()),
        Err(Error::Fs(FsError::NotFound))
    );
    let file = fs
        .open(root, "\\new name.txt", OpenMode::READ, FileAttributes::empty())
        .unwrap();
    let mut buffer = [0; 7];
    assert_eq!(fs.read(file, &mut buffer).unwrap(), 7);
    assert_eq!(&buffer, b"payload");

    // Renaming over an existing file is refused.
    let other = fs.open(root, "\\other", RWC, FileAttributes::empty()).unwrap();
    let info = FileInfo {
        file_name: "new name.txt".into(),
        ..fs.info(other).unwrap()
    };
    assert_eq!(fs.set_info(other, &info), Err(Error::Fs(FsError::AccessDenied)));
}

#[test]
fn rename_moves_between_directories() {
    let fs = server(fat16_image(100));
    let root = fs.open_volume().unwrap();

    fs.open(root, "\\src", RWC, FileAttributes::DIRECTORY).unwrap();
    fs.open(root, "\\dst", RWC, FileAttributes::DIRECTORY).unwrap();
    let file = fs.open(root, "\\src\\file.bin", RWC, FileAttributes::empty()).unwrap();
    fs.write(file, b"abc").unwrap();

    let info = FileInfo {
        file_name: "\\dst\\file.bin".into(),
        ..fs.info(file).unwrap()
    };
    fs.set_info(file, &info).unwrap();
    fs.close(file);

    assert!(fs
        .open(root, "\\dst\\file.bin", OpenMode::READ, FileAttributes::empty())
        .is_ok());
    assert_eq!(
        fs.open(root, "\\src\\file.bin", OpenMode::READ, FileAttributes::empty()),
        Err(Error::Fs(FsError::NotFound))
    );
}

#[test]
fn set_info_times_and_attributes() {
    let fs = server(fat16_image(100));
    let root = fs.open_volume().unwrap();
    let file = fs.open(root, "\\stamped", RWC, FileAttributes::empty()).unwrap();
    fs.write(file, b"x").unwrap();

    let stamp = Timestamp {
        year: 1999,
        month: 12,
        day: 31,
        hour: 23,
        minute: 59,
        second: 58,
    };
    let info = FileInfo {
        create_time: stamp,
        modification_time: stamp,
        attributes: FileAttributes::ARCHIVE | FileAttributes::HIDDEN,
        file_name: "stamped".into(),
        ..fs.info(file).unwrap()
    };
    fs.set_info(file, &info).unwrap();
    fs.flush(file).unwrap();

    let info = fs.info(file).unwrap();
    assert_eq!(info.create_time, stamp);
    // The explicit modification time survives the flush.
    assert_eq!(info.modification_time, stamp);
    assert!(info.attributes.contains(FileAttributes::HIDDEN));

    // An invalid time is rejected.
    let bad = FileInfo {
        create_time: Timestamp {
            year: 1975,
            month: 1,
            day: 1,
            ..Timestamp::ZERO
        },
        ..info.clone()
    };
    assert_eq!(fs.set_info(file, &bad), Err(Error::Fs(FsError::InvalidParameter)));

    // The directory bit cannot be toggled.
    let bad = FileInfo {
        attributes: FileAttributes::DIRECTORY,
        ..info
    };
    assert_eq!(fs.set_info(file, &bad), Err(Error::Fs(FsError::AccessDenied)));
}

#[test]
fn positions_and_seek() {
    let fs = server(fat16_image(100));
    let root = fs.open_volume().unwrap();
    let file = fs.open(root, "\\f", RWC, FileAttributes::empty()).unwrap();
    fs.write(file, &[7; 100]).unwrap();

    // u64::MAX seeks to the end of the file.
    fs.set_position(file, u64::MAX).unwrap();
    assert_eq!(fs.position(file).unwrap(), 100);

    // Reading at the end returns no bytes.
    let mut buffer = [0; 8];
    assert_eq!(fs.read(file, &mut buffer).unwrap(), 0);

    // A directory can only be rewound.
    assert_eq!(fs.set_position(root, 32), Err(Error::Fs(FsError::Unsupported)));
    fs.set_position(root, 0).unwrap();
    assert_eq!(fs.position(root), Err(Error::Fs(FsError::Unsupported)));
}

#[test]
fn volume_label_round_trip() {
    let disk = fat16_image(100);
    let fs = server(disk.clone());
    let root = fs.open_volume().unwrap();

    assert_eq!(fs.volume_label(root).unwrap(), "");
    fs.set_volume_label(root, "HYRAX").unwrap();
    assert_eq!(fs.volume_label(root).unwrap(), "HYRAX");
    assert_eq!(fs.volume_info(root).unwrap().volume_label, "HYRAX");

    // The label entry occupies a root slot but is invisible to listing.
    let file = fs.open(root, "\\visible", RWC, FileAttributes::empty()).unwrap();
    fs.close(file);
    fs.set_position(root, 0).unwrap();
    let names: Vec<String> = std::iter::from_fn(|| fs.read_entry(root).unwrap())
        .map(|info| info.file_name)
        .collect();
    assert_eq!(names, ["visible"]);

    // An unrepresentable label is refused.
    assert_eq!(
        fs.set_volume_label(root, "schönheit"),
        Err(Error::Fs(FsError::Unsupported))
    );
}

#[test]
fn open_parameter_validation() {
    let fs = server(fat16_image(100));
    let root = fs.open_volume().unwrap();

    assert_eq!(
        fs.open(root, "\\x", OpenMode::WRITE, FileAttributes::empty()),
        Err(Error::Fs(FsError::InvalidParameter))
    );
    assert_eq!(
        fs.open(root, "\\x", RWC, FileAttributes::READ_ONLY),
        Err(Error::Fs(FsError::InvalidParameter))
    );
    assert_eq!(
        fs.open(root, "\\bad|name", RWC, FileAttributes::empty()),
        Err(Error::Fs(FsError::InvalidParameter))
    );
    assert_eq!(
        fs.open(root, "\\missing", OpenMode::READ, FileAttributes::empty()),
        Err(Error::Fs(FsError::NotFound))
    );
    // A path may climb at most to the root.
    assert_eq!(
        fs.open(root, "..", OpenMode::READ, FileAttributes::empty()),
        Err(Error::Fs(FsError::InvalidParameter))
    );

    // Deleting the root is refused.
    assert_eq!(fs.delete(root), Err(Error::Fs(FsError::AccessDenied)));
}

#[test]
fn read_only_attribute_denies_write_handles() {
    let fs = server(fat16_image(100));
    let root = fs.open_volume().unwrap();

    let file = fs.open(root, "\\locked", RWC, FileAttributes::empty()).unwrap();
    let info = FileInfo {
        attributes: FileAttributes::READ_ONLY | FileAttributes::ARCHIVE,
        file_name: "locked".into(),
        ..fs.info(file).unwrap()
    };
    fs.set_info(file, &info).unwrap();
    fs.close(file);

    assert_eq!(
        fs.open(root, "\\locked", RW, FileAttributes::empty()),
        Err(Error::Fs(FsError::AccessDenied))
    );
    let file = fs.open(root, "\\locked", OpenMode::READ, FileAttributes::empty()).unwrap();
    assert_eq!(fs.write(file, b"no"), Err(Error::Fs(FsError::AccessDenied)));
    assert_eq!(fs.delete(file), Err(Error::Fs(FsError::WriteProtected)));
}

#[test]
fn file_size_caps_at_4_gib() {
    let fs = server(fat16_image(100));
    let root = fs.open_volume().unwrap();
    let file = fs.open(root, "\\sparse", RWC, FileAttributes::empty()).unwrap();

    // Seeking far past the end is allowed, writing there is capped.
    fs.set_position(file, u32::MAX as u64).unwrap();
    assert_eq!(fs.write(file, b"x"), Err(Error::Fs(FsError::Unsupported)));
}
