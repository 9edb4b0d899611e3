use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use hex::encode;
use sha2::{Digest, Sha256};

use crate::error::MigrateError;

pub struct Hash;

impl Hash {
    pub fn compute_sha2_hash(path: &Path) -> Result<String, MigrateError> {
        let f = File::open(path)?;

        let mut reader = BufReader::new(f);
        let mut hasher = Sha256::new();
        let mut buffer = [0; 8192]; // Read in 8KB chunks

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        let hash = hasher.finalize();

        Ok(encode(hash))
    }

    pub fn short_hash(hash: &str) -> &str {
        &hash[..hash.len().min(12)]
    }
}
