// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity index over the DATA section.
//!
//! One memchr pass records the byte span and class of every `#id=CLASS(...);`
//! record. Attributes are tokenized only when [`EntityTable::decode`] asks
//! for them.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::parser::{parse_entity, record_end, Token};

/// A decoded record
#[derive(Debug, Clone, PartialEq)]
pub struct Entity<'a> {
    pub id: u32,
    pub class: &'a str,
    pub attributes: Vec<Token<'a>>,
}

impl<'a> Entity<'a> {
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Token<'a>> {
        self.attributes.get(index)
    }

    #[inline]
    pub fn get_ref(&self, index: usize) -> Option<u32> {
        self.get(index).and_then(Token::as_ref_id)
    }

    #[inline]
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(Token::as_f64)
    }

    #[inline]
    pub fn get_str(&self, index: usize) -> Option<&'a str> {
        self.get(index).and_then(Token::as_str)
    }

    #[inline]
    pub fn get_enum(&self, index: usize) -> Option<&'a str> {
        self.get(index).and_then(Token::as_enum)
    }

    /// Entity references held in a list attribute
    pub fn get_ref_list(&self, index: usize) -> Vec<u32> {
        self.get(index)
            .and_then(Token::as_list)
            .map(|items| items.iter().filter_map(Token::as_ref_id).collect())
            .unwrap_or_default()
    }

    /// Numbers held in a list attribute
    pub fn get_f64_list(&self, index: usize) -> Vec<f64> {
        self.get(index)
            .and_then(Token::as_list)
            .map(|items| items.iter().filter_map(Token::as_f64).collect())
            .unwrap_or_default()
    }
}

/// Byte spans and classes of all records in a DATA section
pub struct EntityTable<'a> {
    content: &'a str,
    spans: FxHashMap<u32, (usize, usize)>,
    classes: FxHashMap<&'a str, Vec<u32>>,
}

impl<'a> EntityTable<'a> {
    /// Index every record from `data_offset` up to the closing `ENDSEC;`
    pub fn build(content: &'a str, data_offset: usize) -> Self {
        let bytes = content.as_bytes();
        let len = bytes.len();

        let mut spans =
            FxHashMap::with_capacity_and_hasher(len.saturating_sub(data_offset) / 50, Default::default());
        let mut classes: FxHashMap<&'a str, Vec<u32>> = FxHashMap::default();

        let mut pos = data_offset;
        while pos < len {
            let Some(offset) = memchr::memchr2(b'#', b'E', &bytes[pos..]) else {
                break;
            };
            let start = pos + offset;
            if bytes[start] == b'E' {
                if bytes[start..].starts_with(b"ENDSEC;") {
                    break;
                }
                pos = start + 1;
                continue;
            }

            let id_start = start + 1;
            let mut cursor = id_start;
            while cursor < len && bytes[cursor].is_ascii_digit() {
                cursor += 1;
            }
            let id_end = cursor;
            while cursor < len && bytes[cursor].is_ascii_whitespace() {
                cursor += 1;
            }
            if id_end == id_start || cursor >= len || bytes[cursor] != b'=' {
                pos = id_start;
                continue;
            }

            let Some(end) = record_end(bytes, cursor) else {
                break;
            };
            let Ok(id) = content[id_start..id_end].parse::<u32>() else {
                pos = end;
                continue;
            };

            let class = class_name(&content[cursor + 1..end]);
            spans.insert(id, (start, end));
            classes.entry(class).or_default().push(id);
            pos = end;
        }

        Self {
            content,
            spans,
            classes,
        }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.spans.contains_key(&id)
    }

    /// Source text of a record
    pub fn raw(&self, id: u32) -> Option<&'a str> {
        self.spans
            .get(&id)
            .map(|&(start, end)| &self.content[start..end])
    }

    /// Tokenize a record
    pub fn decode(&self, id: u32) -> Result<Entity<'a>> {
        let raw = self.raw(id).ok_or(Error::EntityNotFound(id))?;
        let (_, class, attributes) = parse_entity(raw).map_err(|e| match e {
            Error::Parse { message, .. } => Error::Parse {
                position: self.spans.get(&id).map(|s| s.0).unwrap_or_default(),
                message: format!("#{}: {}", id, message),
            },
            other => other,
        })?;
        Ok(Entity {
            id,
            class,
            attributes,
        })
    }

    /// Ids of all records of `class` (upper case, e.g. `IFCCOLUMN`), in file order
    pub fn ids_of_class(&self, class: &str) -> &[u32] {
        self.classes.get(class).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn class_of(&self, id: u32) -> Option<&'a str> {
        self.raw(id).and_then(|raw| {
            raw.find('=').map(|eq| class_name(&raw[eq + 1..]))
        })
    }
}

/// Class token following the `=` of a record
fn class_name(after_eq: &str) -> &str {
    let trimmed = after_eq.trim_start();
    let end = trimmed
        .find(|c: char| c == '(' || c.is_whitespace())
        .unwrap_or(trimmed.len());
    &trimmed[..end]
}
