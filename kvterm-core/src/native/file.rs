use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs,
    io::{self, Write},
    mem,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{native::Records, options::AccessMethod, status::Status};

/// The current format version of a database file.
const VERSION: u32 = 2;

/// A special sequence of bytes that is used at the beginning of a database file for validation.
const MAGIC: u32 = 0x4B56_5442;

/// Size of the header: magic, version, checksum and body length.
const HEADER_LEN: usize = 3 * mem::size_of::<u32>() + mem::size_of::<u64>();

/// The persisted content of one database file, by sub-database name.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Image {
    pub(crate) databases: BTreeMap<Option<String>, TableImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableImage {
    pub(crate) method: AccessMethod,
    pub(crate) duplicates: bool,
    pub(crate) records: Records,
}

#[derive(Error, Debug)]
pub(crate) enum ValidationError {
    #[error("the database file is invalid")]
    FileInvalid,
    #[error("the file format version is mismatched")]
    VersionMismatched,
    #[error("the body checksum is mismatched")]
    ChecksumMismatched,
}

impl ValidationError {
    #[inline]
    fn status(&self) -> Status {
        match self {
            Self::FileInvalid => Status::EINVAL,
            Self::VersionMismatched => Status::OLD_VERSION,
            Self::ChecksumMismatched => Status::RUNRECOVERY,
        }
    }
}

/// Loads the image stored at `path`, `None` if there is no such file.
pub(crate) fn load(path: &Path) -> Result<Option<Image>, Status> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Status::from_io(&err)),
    };

    decode(&bytes).map(Some).map_err(|err| {
        tracing::error!(path = %path.display(), error = %err, "failed to validate database file");
        err.status()
    })
}

/// Replaces the file at `path` with the image.
///
/// The image is written next to the target first and renamed over it, so readers never
/// observe a partially written file.
pub(crate) fn store(path: &Path, image: &Image) -> Result<(), Status> {
    let body = bincode::serialize(image).map_err(|_| Status::EINVAL)?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(&MAGIC.to_le_bytes());
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    bytes.extend_from_slice(&(body.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&body);

    write_atomically(path, &bytes).map_err(|err| {
        tracing::error!(path = %path.display(), error = %err, "failed to write database file");
        Status::from_io(&err)
    })
}

fn decode(bytes: &[u8]) -> Result<Image, ValidationError> {
    if bytes.len() < HEADER_LEN {
        return Err(ValidationError::FileInvalid);
    }
    let (header, body) = bytes.split_at(HEADER_LEN);
    let field = |idx: usize| {
        let start = idx * mem::size_of::<u32>();
        u32::from_le_bytes([
            header[start],
            header[start + 1],
            header[start + 2],
            header[start + 3],
        ])
    };

    if field(0) != MAGIC {
        return Err(ValidationError::FileInvalid);
    }
    if field(1) != VERSION {
        return Err(ValidationError::VersionMismatched);
    }

    let mut len = [0; mem::size_of::<u64>()];
    len.copy_from_slice(&header[3 * mem::size_of::<u32>()..]);
    if u64::from_le_bytes(len) != body.len() as u64 || crc32fast::hash(body) != field(2) {
        return Err(ValidationError::ChecksumMismatched);
    }

    bincode::deserialize(body).map_err(|_| ValidationError::FileInvalid)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    // Create all necessary intermediate directories.
    if let Some(parent_dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent_dir)?;
    }

    let tmp = temporary_path(path);
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

#[inline]
fn temporary_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    name.into()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{load, store, Image, TableImage, HEADER_LEN};
    use crate::{native::Records, options::AccessMethod, status::Status};

    fn image() -> Image {
        let mut records = Records::new();
        records.put(b"a".to_vec(), b"1", true);
        records.put(b"a".to_vec(), b"2", true);
        let mut image = Image::default();
        image.databases.insert(
            Some("names".to_string()),
            TableImage {
                method: AccessMethod::Hash,
                duplicates: true,
                records,
            },
        );
        image
    }

    #[test]
    fn test_store_and_load() {
        let path = "target/native_file_store.db";
        _ = fs::remove_file(path);
        assert!(load(path.as_ref()).unwrap().is_none());

        store(path.as_ref(), &image()).unwrap();
        let loaded = load(path.as_ref()).unwrap().unwrap();
        let table = &loaded.databases[&Some("names".to_string())];
        assert_eq!(table.method, AccessMethod::Hash);
        assert!(table.duplicates);
        assert_eq!(table.records, image().databases[&Some("names".to_string())].records);
        assert_eq!(table.records.len(), 2);

        _ = fs::remove_file(path);
    }

    #[test]
    fn test_validation() {
        let path = "target/native_file_validation.db";
        store(path.as_ref(), &image()).unwrap();

        let mut bytes = fs::read(path).unwrap();
        *bytes.last_mut().unwrap() ^= 0xff;
        fs::write(path, &bytes).unwrap();
        assert_eq!(load(path.as_ref()).unwrap_err(), Status::RUNRECOVERY);

        bytes[4] = 9;
        fs::write(path, &bytes).unwrap();
        assert_eq!(load(path.as_ref()).unwrap_err(), Status::OLD_VERSION);

        fs::write(path, &bytes[..HEADER_LEN - 1]).unwrap();
        assert_eq!(load(path.as_ref()).unwrap_err(), Status::EINVAL);

        _ = fs::remove_file(path);
    }
}
