//! Settings kept in a file, laid out like a flash record: a magic header and then
//! the postcard encoding.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use scarab_firmware::hal::SettingsStore;
use scarab_firmware::{Settings, SettingsError};

const MAGIC: &[u8; 4] = b"scar";

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileStore {
            path: path.as_ref().to_owned(),
        }
    }
}

fn decode(buf: &[u8]) -> Result<Settings, SettingsError> {
    if buf.len() < MAGIC.len() || &buf[0..4] != MAGIC {
        return Err(SettingsError::Corrupt);
    }
    postcard::from_bytes(&buf[4..]).map_err(|_| SettingsError::Corrupt)
}

fn encode(settings: &Settings) -> Result<Vec<u8>, SettingsError> {
    let mut buf = MAGIC.to_vec();
    let data =
        postcard::to_allocvec(settings).map_err(|e| SettingsError::Storage(e.to_string()))?;
    buf.extend_from_slice(&data);
    Ok(buf)
}

impl SettingsStore for FileStore {
    fn load(&mut self) -> Result<Settings, SettingsError> {
        let buf = match std::fs::read(&self.path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(SettingsError::Missing),
            Err(e) => return Err(SettingsError::Storage(e.to_string())),
        };
        let settings = decode(&buf)?;
        log::info!("loaded settings from {}", self.path.display());
        Ok(settings)
    }

    fn save(&mut self, settings: &Settings) -> Result<(), SettingsError> {
        let buf = encode(settings)?;
        std::fs::write(&self.path, buf).map_err(|e| SettingsError::Storage(e.to_string()))?;
        log::info!("saved settings to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("scarab-{}-{name}", std::process::id()))
    }

    #[test]
    fn save_then_load() {
        let path = scratch("settings.bin");
        let mut store = FileStore::new(&path);
        let mut settings = Settings::default();
        settings.home_offset = [1.0, -2.0, 0.25];
        settings.tunables.axis_steps_per_unit[3] = 93.0;

        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap(), settings);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file() {
        let mut store = FileStore::new(scratch("nothing-here.bin"));
        assert!(matches!(store.load(), Err(SettingsError::Missing)));
    }

    #[test]
    fn wrong_magic_is_corrupt() {
        let mut buf = encode(&Settings::default()).unwrap();
        assert!(decode(&buf).is_ok());
        buf[0] = b'x';
        assert!(matches!(decode(&buf), Err(SettingsError::Corrupt)));
        assert!(matches!(decode(b"sc"), Err(SettingsError::Corrupt)));
    }

    #[test]
    fn truncated_is_corrupt() {
        let buf = encode(&Settings::default()).unwrap();
        assert!(matches!(
            decode(&buf[..buf.len() / 2]),
            Err(SettingsError::Corrupt)
        ));
    }
}
