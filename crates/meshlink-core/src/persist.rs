use std::path::Path;

use crate::error::{MeshError, Result};

/// Atomic 0600 write of engine state, with the path in the error.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    meshlink_logging::fs::write_atomic(path, contents)
        .map_err(|e| MeshError::io(format!("writing {}", path.display()), e))
}
