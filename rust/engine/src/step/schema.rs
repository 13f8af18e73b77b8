// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::str::FromStr;

/// IFC schema lines the built-in engine can be linked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Schema {
    Ifc2x3,
    Ifc4,
    Ifc4x3,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Ifc2x3 => "IFC2X3",
            Schema::Ifc4 => "IFC4",
            Schema::Ifc4x3 => "IFC4X3",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schema {
    type Err = String;

    /// Accepts addenda and corrigenda suffixes (`IFC4_ADD2`, `IFC4X3_TC1`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if upper.starts_with("IFC4X3") {
            Ok(Schema::Ifc4x3)
        } else if upper.starts_with("IFC2X3") {
            Ok(Schema::Ifc2x3)
        } else if upper == "IFC4" || upper.starts_with("IFC4_") {
            Ok(Schema::Ifc4)
        } else {
            Err(upper)
        }
    }
}
