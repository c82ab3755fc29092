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

use hyrax_fs::collation::UnicodeCollation;

use crate::{
    dir::ODir,
    dirent::{
        DirEntry, CASE_EXT_LOWER, CASE_MIXED, CASE_NAME_LOWER, FAT_EXTEND_NAME_LEN,
        FAT_MAIN_NAME_LEN, FAT_NAME_LEN,
    },
};

pub(crate) const PATH_NAME_SEPARATOR: char = '\\';

/// Name length limits in UTF-16 units: the name itself, and the full path
/// rendered as `X:\...\name<NUL>`.
pub(crate) const FILE_STRING_LENGTH: usize = 255;
pub(crate) const PATH_STRING_LENGTH: usize = 260;

// 8.3 generation: `BASETG~1` up to `BASETG~5`, then two base characters,
// four hex characters of the long name's CRC32, and `~1` again.
const MAX_TAIL_RETRY: u8 = 4;
const BASE_TAG_LEN: usize = 6;
const HASH_BASE_TAG_LEN: usize = 2;
const HASH_VALUE_TAG_LEN: usize = BASE_TAG_LEN - HASH_BASE_TAG_LEN;

pub(crate) fn str_len_utf16(s: &str) -> usize {
    s.encode_utf16().count()
}

pub(crate) fn trim_trailing_blanks(name: &[u8]) -> &[u8] {
    let mut len = name.len();
    while len > 0 && name[len - 1] == b' ' {
        len -= 1;
    }
    &name[..len]
}

/// Checks whether `file_name` is a valid 8.3 short name. The output buffer
/// always receives the OEM conversion, which doubles as the base tag for
/// short-name synthesis when the name is not a valid 8.3 name.
pub(crate) fn check_is_8dot3_name(
    file_name: &str,
    file_8dot3_name: &mut [u8; FAT_NAME_LEN],
    collation: &dyn UnicodeCollation,
) -> bool {
    let mut possible_short_name = true;
    file_8dot3_name.fill(b' ');

    let (main_name, extend_name) = match file_name.rfind('.') {
        Some(dot) => (&file_name[..dot], &file_name[dot + 1..]),
        None => (file_name, ""),
    };
    // Blanks and dots other than the separating dot disqualify the name.
    if main_name.contains(['.', ' ']) || extend_name.contains(['.', ' ']) {
        possible_short_name = false;
    }

    let mut main_name_len = str_len_utf16(main_name);
    let mut extend_name_len = str_len_utf16(extend_name);
    if main_name_len == 0 {
        possible_short_name = false;
    }
    if main_name_len > FAT_MAIN_NAME_LEN {
        possible_short_name = false;
        main_name_len = FAT_MAIN_NAME_LEN;
    }
    if extend_name_len > FAT_EXTEND_NAME_LEN {
        possible_short_name = false;
        extend_name_len = FAT_EXTEND_NAME_LEN;
    }

    if collation.str_to_fat(main_name, &mut file_8dot3_name[..main_name_len]) {
        possible_short_name = false;
    }
    if collation.str_to_fat(
        extend_name,
        &mut file_8dot3_name[FAT_MAIN_NAME_LEN..FAT_MAIN_NAME_LEN + extend_name_len],
    ) {
        possible_short_name = false;
    }

    possible_short_name
}

/// Converts one part of an OEM 8.3 name back into a string, trimming the
/// blank padding and lower-casing on request.
pub(crate) fn fat_name_to_str(
    fat_name: &[u8],
    lower_case: bool,
    collation: &dyn UnicodeCollation,
) -> String {
    let s = collation.fat_to_str(trim_trailing_blanks(fat_name));
    if lower_case {
        collation.str_lwr(&s)
    } else {
        s
    }
}

/// Generates a unique 8.3 name from the base tag already placed in
/// `file_name` by [`check_is_8dot3_name`]. Uniqueness is probed against the
/// fully loaded parent directory.
pub(crate) fn create_8dot3_name(
    odir: &ODir,
    long_name: &str,
    file_name: &mut [u8; FAT_NAME_LEN],
) {
    debug_assert!(odir.end_of_dir);

    let mut base_tag_len = trim_trailing_blanks(&file_name[..FAT_MAIN_NAME_LEN]).len();
    if base_tag_len > BASE_TAG_LEN {
        base_tag_len = BASE_TAG_LEN;
    }

    file_name[base_tag_len] = b'~';
    file_name[base_tag_len + 1] = b'1';
    let mut suffix = base_tag_len + 1;

    let mut retry = 0;
    while odir.short_name_search(file_name).is_some() {
        if retry == MAX_TAIL_RETRY {
            // The numeric-tail scheme is exhausted, derive the tag from
            // the long name's CRC32 instead.
            let crc = crc32(long_name);
            if base_tag_len > HASH_BASE_TAG_LEN {
                base_tag_len = HASH_BASE_TAG_LEN;
            }
            for index in 0..HASH_VALUE_TAG_LEN {
                let segment = (crc >> (index * 4) & 0xF) as u8;
                file_name[base_tag_len + index] = if segment > 9 {
                    segment - 10 + b'A'
                } else {
                    segment + b'0'
                };
            }
            file_name[base_tag_len + HASH_VALUE_TAG_LEN] = b'~';
            file_name[base_tag_len + HASH_VALUE_TAG_LEN + 1] = b'1';
            suffix = base_tag_len + HASH_VALUE_TAG_LEN + 1;
            retry += 1;
            continue;
        }
        file_name[suffix] += 1;
        retry += 1;
    }
}

fn crc32(s: &str) -> u32 {
    let mut bytes = Vec::with_capacity((str_len_utf16(s) + 1) * 2);
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes.extend_from_slice(&[0, 0]);
    crc32fast::hash(&bytes)
}

fn check_name_case(s: &str, in_case_flag: u8, collation: &dyn UnicodeCollation) -> u8 {
    if collation.str_lwr(s) == s {
        in_case_flag
    } else if collation.str_upr(s) == s {
        0
    } else {
        CASE_MIXED
    }
}

/// Derives the case flag for a valid 8.3 name. A mixed-case name cannot be
/// expressed by the flag and needs a long-name chain instead, reported
/// through the second return value.
pub(crate) fn case_flag_for(file_string: &str, collation: &dyn UnicodeCollation) -> (u8, bool) {
    let (main_name, extend_name) = match file_string.rfind('.') {
        Some(dot) => (&file_string[..dot], &file_string[dot + 1..]),
        None => (file_string, ""),
    };

    let mut case_flag = 0;
    if !extend_name.is_empty() {
        case_flag |= check_name_case(extend_name, CASE_EXT_LOWER, collation);
    }
    case_flag |= check_name_case(main_name, CASE_NAME_LOWER, collation);
    if case_flag & CASE_MIXED == 0 {
        (case_flag, false)
    } else {
        (0, true)
    }
}

/// Renders the 8.3 name of `entry` according to its case flag. The fallback
/// when a directory entry has no (or a damaged) long-name chain.
pub(crate) fn file_name_via_case_flag(
    entry: &DirEntry,
    collation: &dyn UnicodeCollation,
) -> String {
    let case_flag = entry.case_flag;
    let mut file_string = fat_name_to_str(
        &entry.file_name[..FAT_MAIN_NAME_LEN],
        case_flag & CASE_NAME_LOWER != 0,
        collation,
    );
    let extension = fat_name_to_str(
        &entry.file_name[FAT_MAIN_NAME_LEN..],
        case_flag & CASE_EXT_LOWER != 0,
        collation,
    );
    if !extension.is_empty() {
        file_string.push('.');
        file_string.push_str(&extension);
    }
    file_string
}

/// Validates a long file name: leading blanks and trailing blanks and dots
/// are trimmed, and the result must be non-empty, within 255 UTF-16 units
/// and free of path-forbidden characters.
pub(crate) fn file_name_is_valid(input_file_name: &str) -> Option<String> {
    let trimmed = input_file_name
        .trim_start_matches(' ')
        .trim_end_matches([' ', '.']);
    if trimmed.is_empty() || str_len_utf16(trimmed) > FILE_STRING_LENGTH {
        return None;
    }
    if trimmed
        .chars()
        .any(|c| c < ' ' || matches!(c, '"' | '*' | '/' | ':' | '<' | '>' | '?' | '\\' | '|'))
    {
        return None;
    }
    Some(trimmed.to_string())
}

/// Splits off the next path component, also consuming any run of
/// separators that follows it.
pub(crate) fn next_name_component(path: &str) -> (&str, &str) {
    let (name, rest) = match path.find(PATH_NAME_SEPARATOR) {
        Some(at) => (&path[..at], &path[at..]),
        None => (path, ""),
    };
    (name, rest.trim_start_matches(PATH_NAME_SEPARATOR))
}
