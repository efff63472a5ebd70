//! filesystem storage rooted at a directory. virtual paths from the server
//! are absolute (`/music/song.mp3`); they are re-rooted under the served
//! directory, and any path trying to climb out of it is rejected.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use soloftp::{DirEntry, Metadata, Storage};

pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: &Path) -> io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// map a virtual path onto the served directory.
    fn real(&self, path: &Path) -> io::Result<PathBuf> {
        let mut real = self.root.clone();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => real.push(part),
                // `..` and windows prefixes would escape the root
                _ => return Err(io::ErrorKind::PermissionDenied.into()),
            }
        }
        Ok(real)
    }
}

fn metadata_from(meta: &fs::Metadata) -> Metadata {
    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Metadata {
        size: meta.len(),
        modified,
        is_dir: meta.is_dir(),
    }
}

impl Storage for DiskStorage {
    type File = fs::File;

    fn open_read(&mut self, path: &Path) -> io::Result<fs::File> {
        fs::File::open(self.real(path)?)
    }

    fn open_write(&mut self, path: &Path) -> io::Result<fs::File> {
        fs::File::create(self.real(path)?)
    }

    fn metadata(&mut self, path: &Path) -> io::Result<Metadata> {
        Ok(metadata_from(&fs::metadata(self.real(path)?)?))
    }

    fn list_dir(&mut self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.real(path)?)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                meta: metadata_from(&entry.metadata()?),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn create_dir(&mut self, path: &Path) -> io::Result<()> {
        fs::create_dir(self.real(path)?)
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.real(path)?)
    }

    fn remove_dir(&mut self, path: &Path) -> io::Result<()> {
        fs::remove_dir(self.real(path)?)
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(self.real(from)?, self.real(to)?)
    }
}
