//! Zip packaging of the exchanged files.
//!
//! An exchange archive holds the description, structure and data files at
//! its root and every binary payload under `binary/`. Import extracts the
//! whole archive into a temporary directory and reads from there.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use dbexchange::{ExchangeError, Result};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const BINARY_DIR: &str = "binary";

fn zip_err(err: zip::result::ZipError) -> ExchangeError {
    ExchangeError::Io(io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Pack the named exchange files plus every payload of the binary folder
/// into one archive. Missing files are simply left out; the loose payload
/// files are removed once packed.
pub fn pack(zip_path: &Path, files: &[&Path], binary_folder: &Path) -> Result<()> {
    let out = File::create(zip_path)?;
    let mut writer = ZipWriter::new(out);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in files {
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writer.start_file(name, options).map_err(zip_err)?;
        writer.write_all(&fs::read(path)?)?;
    }

    let mut packed_payloads = Vec::new();
    if binary_folder.is_dir() {
        for entry in fs::read_dir(binary_folder)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "bin").unwrap_or(false) {
                let name = format!("{}/{}", BINARY_DIR, entry.file_name().to_string_lossy());
                writer.start_file(name, options).map_err(zip_err)?;
                writer.write_all(&fs::read(&path)?)?;
                packed_payloads.push(path);
            }
        }
    }

    writer.finish().map_err(zip_err)?;
    for path in &packed_payloads {
        fs::remove_file(path)?;
    }
    info!(
        archive = %zip_path.display(),
        payloads = packed_payloads.len(),
        "exchange archive written"
    );
    Ok(())
}

/// Extract a whole exchange archive into `dest`.
pub fn unpack(zip_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(zip_path).map_err(|source| {
        ExchangeError::Io(io::Error::new(
            source.kind(),
            format!("unable to open the archive {}: {}", zip_path.display(), source),
        ))
    })?;
    let mut archive = ZipArchive::new(file).map_err(zip_err)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_err)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content)?;
        fs::write(&target, content)?;
        debug!(file = %target.display(), "extracted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_then_unpack_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("dbexportdata.json");
        fs::write(&data, b"{\"town\":[]}").unwrap();
        let binary = dir.path().join("binary");
        fs::create_dir(&binary).unwrap();
        fs::write(binary.join("towns-seal-TLS.bin"), b"\x01\x02").unwrap();

        let zip_path = dir.path().join("dbexport.zip");
        pack(&zip_path, &[&data], &binary).unwrap();

        // Loose payloads are removed once packed.
        assert!(!binary.join("towns-seal-TLS.bin").exists());

        let out = tempfile::tempdir().unwrap();
        unpack(&zip_path, out.path()).unwrap();
        assert_eq!(fs::read(out.path().join("dbexportdata.json")).unwrap(), b"{\"town\":[]}");
        assert_eq!(
            fs::read(out.path().join("binary").join("towns-seal-TLS.bin")).unwrap(),
            b"\x01\x02"
        );
    }

    #[test]
    fn test_missing_files_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("dbexport.zip");
        let ghost = dir.path().join("missing.json");
        pack(&zip_path, &[&ghost], &dir.path().join("no-binary")).unwrap();

        let archive = ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
