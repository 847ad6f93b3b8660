/*
 * Provides utility functions for calculating checksums of file content.
 * The profile writer uses these to detect whether a serialized profile
 * differs from what is already on disk, so that unchanged content does
 * not get rewritten (which would bump the file's modification time and
 * disturb tie-break ordering on the next rescan).
 */
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/*
 * Calculates the SHA256 checksum of a file and returns it as a hex-encoded string.
 *
 * Reads the file in chunks to handle potentially large files efficiently. If any
 * I/O error occurs during file reading or if the path does not point to a file,
 * an `io::Error` is returned.
 */
pub fn calculate_sha256_checksum(file_path: &Path) -> io::Result<String> {
    if !file_path.is_file() {
        let err_msg = format!(
            "Path {:?} is not a file, cannot calculate checksum.",
            file_path
        );
        log::warn!("ChecksumUtils: {}", err_msg);
        return Err(io::Error::new(io::ErrorKind::InvalidInput, err_msg));
    }

    let file = File::open(file_path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0; 1024 * 4]; // 4KB buffer

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let hash_bytes = hasher.finalize();
    Ok(format!("{:x}", hash_bytes))
}

/// Calculates the SHA256 checksum of an in-memory buffer, hex-encoded.
pub fn checksum_of_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
