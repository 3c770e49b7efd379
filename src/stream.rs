use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ReportError, Result};

/// Hands out output files that share one base name: `report.html`, then
/// `report2.gif`, `report3.jpeg`, ...
///
/// The first file is the main stream and is opened on construction. Only the
/// main stream is owned here; auxiliary files belong to whoever asked for them.
pub struct StreamSequencer {
    directory: PathBuf,
    file_name: String,
    overwrite: bool,
    next_number: usize,
    main: Option<BufWriter<File>>,
    files: Vec<PathBuf>,
}

impl StreamSequencer {
    pub fn new(path: impl AsRef<Path>, overwrite: bool) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .ok_or_else(|| {
                ReportError::InvalidConfiguration(format!(
                    "output path {} has no extension",
                    path.display()
                ))
            })?
            .to_string();
        let file_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                ReportError::InvalidConfiguration(format!(
                    "output path {} has no file name",
                    path.display()
                ))
            })?
            .to_string();
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut sequencer = Self {
            directory,
            file_name,
            overwrite,
            next_number: 1,
            main: None,
            files: Vec::new(),
        };
        let (_, main) = sequencer.next_stream(&extension)?;
        sequencer.main = Some(BufWriter::new(main));
        Ok(sequencer)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Opens the next file in the sequence and returns its name relative to
    /// the output directory.
    pub fn next_stream(&mut self, extension: &str) -> Result<(String, File)> {
        let suffix = if self.next_number > 1 {
            self.next_number.to_string()
        } else {
            String::new()
        };
        let relative = format!("{}{}.{}", self.file_name, suffix, extension);
        let target = self.directory.join(&relative);
        self.next_number += 1;

        if target.exists() {
            if self.overwrite {
                fs::remove_file(&target)?;
            } else {
                return Err(ReportError::OutputExists(target));
            }
        }
        let file = File::create(&target)?;
        log::debug!("opened output stream {}", target.display());
        self.files.push(target);
        Ok((relative, file))
    }

    pub fn main_writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.main.as_mut().ok_or_else(|| {
            ReportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "main stream already closed",
            ))
        })
    }

    /// Every path produced so far, main stream first.
    pub fn file_list(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn close_main(&mut self) -> Result<()> {
        if let Some(mut main) = self.main.take() {
            main.flush()?;
        }
        Ok(())
    }
}

impl Drop for StreamSequencer {
    fn drop(&mut self) {
        if let Some(main) = self.main.as_mut() {
            let _ = main.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_numbered_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut seq = StreamSequencer::new(dir.path().join("report.html"), false).unwrap();
        let (second, _) = seq.next_stream("gif").unwrap();
        let (third, _) = seq.next_stream("jpeg").unwrap();
        assert_eq!(second, "report2.gif");
        assert_eq!(third, "report3.jpeg");
        assert_eq!(seq.file_list().len(), 3);
        assert_eq!(seq.file_list()[0], dir.path().join("report.html"));
        assert!(dir.path().join("report3.jpeg").exists());
    }

    #[test]
    fn main_stream_is_flushed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut seq = StreamSequencer::new(&path, false).unwrap();
        write!(seq.main_writer().unwrap(), "hello").unwrap();
        seq.close_main().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert!(seq.main_writer().is_err());
    }

    #[test]
    fn existing_file_is_left_alone_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.html");
        std::fs::write(&path, "keep me").unwrap();
        let err = match StreamSequencer::new(&path, false) {
            Ok(_) => panic!("expected OutputExists"),
            Err(err) => err,
        };
        assert!(matches!(err, ReportError::OutputExists(ref p) if p == &path));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn overwrite_replaces_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report2.png"), "old").unwrap();
        let mut seq = StreamSequencer::new(dir.path().join("report.html"), true).unwrap();
        let (name, mut file) = seq.next_stream("png").unwrap();
        file.write_all(b"new").unwrap();
        drop(file);
        assert_eq!(name, "report2.png");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("report2.png")).unwrap(),
            "new"
        );
    }

    #[test]
    fn path_without_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            StreamSequencer::new(dir.path().join("report"), false),
            Err(ReportError::InvalidConfiguration(_))
        ));
    }
}
