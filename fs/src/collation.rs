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

/// Case folding and OEM character-set conversion, supplied to a file system
/// by the platform. FAT uses it for case-insensitive lookup and for the
/// 8.3 (OEM) rendering of names.
pub trait UnicodeCollation {
    /// Case-insensitive comparison of two names.
    fn stri_cmp(&self, s1: &str, s2: &str) -> Ordering;

    fn str_upr(&self, s: &str) -> String;

    fn str_lwr(&self, s: &str) -> String;

    /// Converts up to `fat.len()` characters of `s` into OEM bytes.
    /// Returns true if any character had no clean OEM mapping; the
    /// output then contains substitutes and must not be used as a
    /// matching 8.3 name.
    fn str_to_fat(&self, s: &str, fat: &mut [u8]) -> bool;

    /// Converts OEM bytes back into a string. The inverse of
    /// [`Self::str_to_fat`] for every cleanly mapped character.
    fn fat_to_str(&self, fat: &[u8]) -> String;
}

// OEM characters that may not appear in an 8.3 name.
const ILLEGAL_OEM: &[u8] = b"\"*+,./:;<=>?[\\]|";

/// ASCII-only collation, the default when the platform provides nothing
/// richer. Characters outside ASCII have no OEM mapping here and are
/// substituted with `_`.
pub struct EnglishCollation;

impl UnicodeCollation for EnglishCollation {
    fn stri_cmp(&self, s1: &str, s2: &str) -> Ordering {
        let fold = |c: char| {
            if c.is_ascii() {
                c.to_ascii_uppercase()
            } else {
                c
            }
        };
        s1.chars().map(fold).cmp(s2.chars().map(fold))
    }

    fn str_upr(&self, s: &str) -> String {
        s.chars().map(|c| c.to_ascii_uppercase()).collect()
    }

    fn str_lwr(&self, s: &str) -> String {
        s.chars().map(|c| c.to_ascii_lowercase()).collect()
    }

    fn str_to_fat(&self, s: &str, fat: &mut [u8]) -> bool {
        let mut lossy = false;
        let mut count = 0;
        for c in s.chars().take(fat.len()) {
            let oem = if c.is_ascii() {
                c.to_ascii_uppercase() as u8
            } else {
                lossy = true;
                b'_'
            };
            if ILLEGAL_OEM.contains(&oem) || oem < 0x20 {
                lossy = true;
            }
            fat[count] = oem;
            count += 1;
        }
        lossy
    }

    fn fat_to_str(&self, fat: &[u8]) -> String {
        fat.iter().map(|&b| char::from(b)).collect()
    }
}
