// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ISO-10303-21 signature and HEADER section.

use crate::error::{Error, Result};

use super::parser::{parse_record, record_end, unescape, Token};

/// First record of every exchange structure
pub const STEP_MAGIC: &str = "ISO-10303-21;";

/// Fields of the HEADER section the engine uses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepHeader {
    /// FILE_NAME name attribute
    pub file_name: Option<String>,
    /// FILE_SCHEMA identifiers, as written
    pub schemas: Vec<String>,
    /// Byte offset of the DATA section body
    pub data_offset: usize,
}

/// Next record at `pos`, trimmed; `pos` moves past its terminating `;`
fn next_record<'c>(content: &'c str, pos: &mut usize) -> Option<&'c str> {
    let end = record_end(content.as_bytes(), *pos)?;
    let record = content[*pos..end].trim();
    *pos = end;
    Some(record)
}

/// Check the signature and read the HEADER section.
///
/// Sections are located record by record, so section keywords inside quoted
/// header values are never mistaken for section boundaries.
pub fn read_header(content: &str) -> Result<StepHeader> {
    let body = content.trim_start_matches('\u{feff}').trim_start();
    if !body.starts_with(STEP_MAGIC) {
        let preview: String = body.chars().take(16).collect();
        return Err(Error::NotStep(format!(
            "missing {} signature (starts with {:?})",
            STEP_MAGIC, preview
        )));
    }

    let mut pos = content.len() - body.len() + STEP_MAGIC.len();
    if next_record(content, &mut pos) != Some("HEADER;") {
        return Err(Error::NotStep("no HEADER section".into()));
    }

    let mut header = StepHeader::default();
    loop {
        let record = next_record(content, &mut pos)
            .ok_or_else(|| Error::NotStep("unterminated HEADER section".into()))?;
        if record == "ENDSEC;" {
            break;
        }
        let (name, args) = parse_record(record)?;
        match name {
            "FILE_NAME" => {
                header.file_name = args.first().and_then(Token::as_str).map(unescape);
            }
            "FILE_SCHEMA" => {
                header.schemas = args
                    .first()
                    .and_then(Token::as_list)
                    .unwrap_or_default()
                    .iter()
                    .filter_map(Token::as_str)
                    .map(unescape)
                    .collect();
            }
            _ => {}
        }
    }

    if next_record(content, &mut pos) != Some("DATA;") {
        return Err(Error::NotStep("no DATA section".into()));
    }
    header.data_offset = pos;

    Ok(header)
}
