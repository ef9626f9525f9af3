use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::*;

pub const TEMP_PREFIX: &str = ".reel-tmp-";

/// A private sibling of `target` that a rewrite writes into.
///
/// Nothing is visible at `target` until [`StagedOutput::promote`] renames the
/// temp file over it. Dropping without promoting removes the temp file.
#[derive(Debug)]
pub struct StagedOutput {
    target: PathBuf,
    temp: PathBuf,
    promoted: bool,
}

impl StagedOutput {
    pub fn new(target: &Path) -> Self {
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            target: target.to_path_buf(),
            temp: parent.join(format!("{TEMP_PREFIX}{}-{name}", uuid::Uuid::new_v4())),
            promoted: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.temp
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically replaces the target with the staged file.
    pub fn promote(mut self) -> io::Result<()> {
        fs::rename(&self.temp, &self.target)?;
        self.promoted = true;
        debug!(target = ?self.target, "Promoted staged output");
        Ok(())
    }

    pub fn discard(self) {
        drop(self);
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if self.promoted {
            return;
        }

        match fs::remove_file(&self.temp) {
            Ok(()) => debug!(temp = ?self.temp, "Discarded staged output"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(temp = ?self.temp, "Failed to remove staged output: {e}"),
        }
    }
}
