//! Per-job working copies
//!
//! Every job runs in a private copy of the runner workspace, so files one
//! job writes are never seen by a sibling job or by another run. The copy is
//! removed when the job's environment is torn down.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::error::ProvisionError;

pub struct JobWorkspace {
    // Removed from disk when dropped
    _root: TempDir,
    working_dir: PathBuf,
}

impl JobWorkspace {
    /// Copies `source` into a fresh directory and resolves the job's
    /// working directory inside it
    pub async fn prepare(
        source: &Path,
        working_dir: Option<&str>,
    ) -> Result<Self, ProvisionError> {
        let unavailable = |e: io::Error| ProvisionError::Workspace {
            path: source.to_path_buf(),
            source: e,
        };

        let root = tempfile::Builder::new()
            .prefix("gantry-job-")
            .tempdir()
            .map_err(unavailable)?;
        let files = copy_directory_contents(source, root.path())
            .await
            .map_err(unavailable)?;
        debug!(
            "Copied {} files from {} to {}",
            files,
            source.display(),
            root.path().display()
        );

        let dir = match working_dir {
            Some(relative) => root.path().join(relative),
            None => root.path().to_path_buf(),
        };
        if !dir.is_dir() {
            return Err(ProvisionError::WorkingDirMissing(
                working_dir.unwrap_or(".").to_string(),
            ));
        }

        Ok(Self {
            _root: root,
            working_dir: dir,
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

async fn copy_directory_contents(src: &Path, dst: &Path) -> io::Result<usize> {
    use tokio::fs;

    fs::create_dir_all(dst).await?;

    let mut count = 0;
    let mut entries = fs::read_dir(src).await?;

    while let Some(entry) = entries.next_entry().await? {
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type().await?;

        if file_type.is_dir() {
            count += Box::pin(copy_directory_contents(&src_path, &dst_path)).await?;
        } else if file_type.is_file() {
            fs::copy(&src_path, &dst_path).await?;
            count += 1;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&src_path).await?;
            fs::symlink(&target, &dst_path).await?;
            count += 1;
        }
    }

    Ok(count)
}
