//! A directory standing in for the SD card.

use std::{
    fs::File,
    io::{BufWriter, Write as _},
    path::{Path, PathBuf},
};

use scarab_firmware::hal::Media;
use scarab_firmware::MediaError;

pub struct DirMedia {
    root: PathBuf,
    file: Option<Vec<u8>>,
    pos: usize,
    printing: bool,
    writer: Option<BufWriter<File>>,
}

impl DirMedia {
    pub fn new(root: impl AsRef<Path>) -> Self {
        DirMedia {
            root: root.as_ref().to_owned(),
            file: None,
            pos: 0,
            printing: false,
            writer: None,
        }
    }

    // Only the last component counts, so a file name cannot leave the directory.
    fn path(&self, name: &str) -> Result<PathBuf, MediaError> {
        let name = Path::new(name).file_name().ok_or(MediaError::OpenFailed)?;
        Ok(self.root.join(name))
    }
}

impl Media for DirMedia {
    fn read_byte(&mut self) -> Option<u8> {
        if !self.printing {
            return None;
        }
        let byte = self.file.as_ref()?.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }

    fn end_of_media(&self) -> bool {
        self.file.as_ref().map_or(true, |f| self.pos >= f.len())
    }

    fn is_printing(&self) -> bool {
        self.printing
    }

    fn select(&mut self, name: &str) -> Result<u32, MediaError> {
        let path = self.path(name)?;
        let bytes = std::fs::read(&path).map_err(|e| {
            log::warn!("reading {}: {e}", path.display());
            MediaError::OpenFailed
        })?;
        let size = u32::try_from(bytes.len()).map_err(|_| MediaError::OpenFailed)?;
        self.file = Some(bytes);
        self.pos = 0;
        self.printing = false;
        Ok(size)
    }

    fn start(&mut self) {
        self.printing = self.file.is_some();
    }

    fn pause(&mut self) {
        self.printing = false;
    }

    fn status(&self) -> Option<(u32, u32)> {
        let file = self.file.as_ref()?;
        Some((self.pos as u32, file.len() as u32))
    }

    fn begin_write(&mut self, name: &str) -> Result<(), MediaError> {
        let path = self.path(name)?;
        let file = File::create(&path).map_err(|e| {
            log::warn!("creating {}: {e}", path.display());
            MediaError::OpenFailed
        })?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn write_line(&mut self, line: &str) {
        if let Some(w) = self.writer.as_mut() {
            if let Err(e) = writeln!(w, "{line}") {
                log::error!("writing to media: {e}");
            }
        }
    }

    fn finish_write(&mut self) {
        if let Some(mut w) = self.writer.take() {
            if let Err(e) = w.flush() {
                log::error!("writing to media: {e}");
            }
        }
    }

    fn finished(&mut self) {
        self.printing = false;
        self.file = None;
    }
}
