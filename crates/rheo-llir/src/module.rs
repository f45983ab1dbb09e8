//! The LLIR module container.

use serde::{Deserialize, Serialize};

use crate::ipg::Ipg;
use crate::types::StructRegistry;

/// A named container for one compilation unit: target strings, the struct
/// declaration registry, and the inter-procedural graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlirModule {
    pub name: String,
    pub target_triple: String,
    pub data_layout: String,
    pub structs: StructRegistry,
    pub ipg: Ipg,
}

impl LlirModule {
    pub fn new(name: impl Into<String>) -> Self {
        LlirModule {
            name: name.into(),
            target_triple: String::new(),
            data_layout: String::new(),
            structs: StructRegistry::new(),
            ipg: Ipg::new(),
        }
    }
}
