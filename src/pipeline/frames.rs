//! Still-image sources for visual telemetry.

use crate::error::{Result, VoxdeskError};
use crate::pipeline::types::MediaBlob;
use std::path::{Path, PathBuf};

/// Produces one media still per call.
pub trait FrameSource: Send {
    /// Next still, or `None` once the source has nothing more to give.
    fn next_frame(&mut self) -> Result<Option<MediaBlob>>;
}

/// Cycles through the JPEG files of a directory in name order.
///
/// Files are listed once at open; each still is read from disk when it is
/// due, so a camera overwriting the files in place is picked up.
#[derive(Debug)]
pub struct JpegDirectory {
    files: Vec<PathBuf>,
    next: usize,
}

impl JpegDirectory {
    /// # Errors
    /// `VoxdeskError::Io` if the directory cannot be listed,
    /// `VoxdeskError::Other` if it holds no `.jpg` or `.jpeg` file.
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_jpeg(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(VoxdeskError::Other(format!(
                "no JPEG files in {}",
                dir.display()
            )));
        }
        files.sort();
        log::debug!("{} still(s) in {}", files.len(), dir.display());
        Ok(Self { files, next: 0 })
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

impl FrameSource for JpegDirectory {
    fn next_frame(&mut self) -> Result<Option<MediaBlob>> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();
        let bytes = std::fs::read(path)?;
        Ok(Some(MediaBlob::jpeg(&bytes)))
    }
}
