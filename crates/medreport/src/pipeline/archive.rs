use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::email::report_filename;

use super::context::ReportArtifact;

/// Keeps a copy of each rendered report in a directory, as `Health_Report_<id>.pdf`.
#[derive(Debug, Clone)]
pub struct ReportArchive {
    dir: PathBuf,
}

impl ReportArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the artifact's PDF, replacing an earlier copy for the same patient.
    pub fn store(&self, artifact: &ReportArtifact) -> io::Result<PathBuf> {
        let pdf = artifact.pdf.as_deref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "report has not been rendered")
        })?;

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(report_filename(&artifact.patient_id));
        fs::write(&path, pdf)?;
        Ok(path)
    }
}
