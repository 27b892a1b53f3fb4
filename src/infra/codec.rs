// ============================================================
// Layer 6 — On-disk Codec
// ============================================================
// Two encodings, both written through a temp file in the target
// directory and renamed into place, so a reader never sees a
// half-written file:
//
//   *.bin.gz — bincode, gzip-compressed (checkpoints, artifacts)
//   *.json   — pretty JSON (metrics, run params, registry index)
//
// WriteMode::CreateNew refuses to replace an existing file; the
// checkpoint directory relies on it to stay append-only.
//
// Reference: tempfile crate (NamedTempFile::persist),
//            bincode 1.x serialize_into / deserialize_from

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Atomically replace whatever is at the path
    Replace,
    /// Fail if the path already exists
    CreateNew,
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Write `fill`'s output to a temp file next to `path`, then rename.
fn write_via_temp<F>(path: &Path, mode: WriteMode, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<()>,
{
    let dir = parent_dir(path);
    fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create directory '{}'", dir.display()))?;

    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Cannot create temp file in '{}'", dir.display()))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        fill(&mut w)?;
        w.flush()?;
    }
    tmp.as_file().sync_all()?;

    match mode {
        WriteMode::Replace => tmp.persist(path).map(|_| ()),
        WriteMode::CreateNew => tmp.persist_noclobber(path).map(|_| ()),
    }
    .with_context(|| format!("Cannot move temp file into '{}'", path.display()))
}

/// bincode + gzip.
pub fn write_compressed<T: Serialize>(path: &Path, value: &T, mode: WriteMode) -> Result<()> {
    write_via_temp(path, mode, |w| {
        let mut enc = GzEncoder::new(w, Compression::default());
        bincode::serialize_into(&mut enc, value)
            .with_context(|| format!("Cannot encode '{}'", path.display()))?;
        enc.finish()?;
        Ok(())
    })
}

pub fn read_compressed<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .with_context(|| format!("Cannot open '{}'", path.display()))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    bincode::deserialize_from(decoder)
        .with_context(|| format!("Cannot decode '{}'", path.display()))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_via_temp(path, WriteMode::Replace, |w| {
        serde_json::to_writer_pretty(&mut *w, value)?;
        writeln!(w)?;
        Ok(())
    })
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_round_trip_and_no_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.bin.gz");

        write_compressed(&path, &vec![1.5f64, f64::NAN, -2.0], WriteMode::CreateNew).unwrap();
        let back: Vec<f64> = read_compressed(&path).unwrap();
        assert_eq!(back[0], 1.5);
        assert!(back[1].is_nan());

        assert!(write_compressed(&path, &vec![0.0f64], WriteMode::CreateNew).is_err());
        let still: Vec<f64> = read_compressed(&path).unwrap();
        assert_eq!(still.len(), 3);

        write_compressed(&path, &vec![0.0f64], WriteMode::Replace).unwrap();
        let replaced: Vec<f64> = read_compressed(&path).unwrap();
        assert_eq!(replaced, vec![0.0]);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        write_json(&dir.path().join("m.json"), &serde_json::json!({"a": 1})).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, vec![std::ffi::OsString::from("m.json")]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin.gz");
        fs::write(&path, b"not gzip").unwrap();
        assert!(read_compressed::<Vec<f64>>(&path).is_err());
    }
}
