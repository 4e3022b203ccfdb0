//! Verbatim file copies
//!
//! WAL segments and staged restore files are copied byte for byte; the
//! destination is fsynced before the copy counts as done.

use std::fs::File;
use std::io;
use std::path::Path;

/// Copy `src` to `dst`, creating `dst`'s parent directory if needed
///
/// Returns the number of bytes copied.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut input = File::open(src)?;
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut output = File::create(dst)?;
    let bytes = io::copy(&mut input, &mut output)?;
    output.sync_all()?;
    Ok(bytes)
}
