//! Tool annotation flags (read-only / idempotent / open-world), attached to
//! every `ToolDescriptor`. Conservative defaults assume a tool can mutate
//! state and is not safe to retry blindly unless it says otherwise.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAnnotations {
    pub read_only: bool,
    pub idempotent: bool,
    pub open_world: bool,
}

impl Default for ToolAnnotations {
    fn default() -> Self {
        Self {
            read_only: false,
            idempotent: false,
            open_world: true,
        }
    }
}

impl ToolAnnotations {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            idempotent: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    #[must_use]
    pub fn with_open_world(mut self, open_world: bool) -> Self {
        self.open_world = open_world;
        self
    }
}
