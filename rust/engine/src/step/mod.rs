// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in ISO-10303-21 (IFC) engine.
//!
//! An engine build is linked against a fixed set of IFC schema lines. Assets
//! declaring any other schema are refused with a link error, which the
//! loader treats as a version mismatch and answers by trying the next
//! candidate.

pub mod extrusion;
pub mod header;
pub mod index;
pub mod model;
pub mod parser;
pub mod schema;

use planview_core::SceneNode;

use crate::error::{Error, Result};

pub use header::{read_header, StepHeader, STEP_MAGIC};
pub use index::{Entity, EntityTable};
pub use model::{default_color, length_unit_scale, SceneBuilder, PRODUCT_CLASSES};
pub use parser::Token;
pub use schema::Schema;

/// STEP engine linked against a set of schemas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEngine {
    name: String,
    linked: Vec<Schema>,
}

impl StepEngine {
    pub fn new(name: impl Into<String>, linked: Vec<Schema>) -> Self {
        Self {
            name: name.into(),
            linked,
        }
    }

    pub fn linked(&self) -> &[Schema] {
        &self.linked
    }

    /// Parse an asset into a scene tree
    pub fn parse(&self, buffer: &[u8]) -> Result<SceneNode> {
        let content = std::str::from_utf8(buffer)?;
        let header = read_header(content)?;
        self.link(&header)?;

        let table = EntityTable::build(content, header.data_offset);
        tracing::debug!(
            engine = %self.name,
            entities = table.len(),
            bytes = buffer.len(),
            "indexed DATA section"
        );
        SceneBuilder::new(&table).build()
    }

    /// Check the declared schema against the linked set
    fn link(&self, header: &StepHeader) -> Result<Schema> {
        let declared = header
            .schemas
            .first()
            .ok_or_else(|| Error::NotStep("FILE_SCHEMA is missing".into()))?;

        match declared.parse::<Schema>() {
            Ok(schema) if self.linked.contains(&schema) => Ok(schema),
            Ok(schema) => Err(self.mismatch(schema.to_string())),
            Err(unknown) => Err(self.mismatch(unknown)),
        }
    }

    fn mismatch(&self, found: String) -> Error {
        Error::SchemaMismatch {
            engine: self.name.clone(),
            found,
            linked: self
                .linked
                .iter()
                .map(Schema::as_str)
                .collect::<Vec<_>>()
                .join("+"),
        }
    }
}
