use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    /// SHA-256 of the whole file.
    Sha256(String),
    /// SHA-256 of the first MiB and, for files over 2 MiB, the last MiB.
    Quick(String),
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Sha256(digest) => write!(f, "sha256:{}", digest),
            Fingerprint::Quick(digest) => write!(f, "quick:{}", digest),
        }
    }
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn quick_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut hasher = Sha256::new();
    let mut buffer = Vec::with_capacity(MIB as usize);

    (&mut file).take(MIB).read_to_end(&mut buffer)?;
    hasher.update(&buffer);

    if len > 2 * MIB {
        buffer.clear();
        file.seek(SeekFrom::End(-(MIB as i64)))?;
        file.take(MIB).read_to_end(&mut buffer)?;
        hasher.update(&buffer);
    }

    Ok(hex::encode(hasher.finalize()))
}
