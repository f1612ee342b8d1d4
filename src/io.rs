//! File access: copy-on-write mappings for reading, buffered writes for saving.

use crate::error::Result;
use log::debug;
use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Maps a file privately. Writes go to the mapping's own pages and never reach the file.
pub fn map_copy(path: &Path) -> Result<MmapMut> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    // SAFETY: the mapping is private (copy-on-write), so our writes never alias the file. Other
    // processes truncating or rewriting the file while it is mapped is outside our control; that
    // is the documented precondition of every file-backed document.
    #[allow(unsafe_code)]
    let map = unsafe { MmapOptions::new().map_copy(&file)? };
    debug!("mapped {} ({len} bytes, copy-on-write)", path.display());
    Ok(map)
}

/// Writes `bytes` to `path`, truncating any existing file.
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}
