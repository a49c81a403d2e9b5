// Script source resolution: relative-path joining, canonicalization, and reading.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub directory: PathBuf,
    pub text: String,
}

impl SourceFile {
    /// Resolves `raw` to a canonical file and reads it as UTF-8 text.
    ///
    /// Only paths that begin with `./` or `../` are joined onto `base_dir`;
    /// everything else is handed to the OS as given.
    pub fn resolve(raw: &str, base_dir: Option<&Path>) -> Result<Self, Error> {
        if raw.is_empty() {
            return Err(Error::new(ErrorKind::Load).with_message("path is empty"));
        }
        let joined = join_relative(raw, base_dir);
        let path = fs::canonicalize(&joined).map_err(|err| {
            Error::new(ErrorKind::Load)
                .with_message(describe_io(&err, "failed to resolve script path"))
                .with_path(&joined)
                .with_source(err)
        })?;
        if !path.is_file() {
            return Err(Error::new(ErrorKind::Load)
                .with_message("script path is not a file")
                .with_path(&path));
        }
        let bytes = fs::read(&path).map_err(|err| {
            Error::new(ErrorKind::Load)
                .with_message(describe_io(&err, "failed to read script"))
                .with_path(&path)
                .with_source(err)
        })?;
        let text = String::from_utf8(bytes).map_err(|err| {
            Error::new(ErrorKind::Load)
                .with_message("script is not valid UTF-8")
                .with_path(&path)
                .with_source(err)
        })?;
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Ok(Self {
            path,
            directory,
            text,
        })
    }
}

fn join_relative(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let dotted = raw.starts_with("./")
        || raw.starts_with(".\\")
        || raw.starts_with("../")
        || raw.starts_with("..\\");
    match base_dir {
        Some(base) if dotted => base.join(raw),
        _ => PathBuf::from(raw),
    }
}

fn describe_io(err: &io::Error, fallback: &str) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "script file not found".to_string(),
        io::ErrorKind::PermissionDenied => "permission denied reading script".to_string(),
        _ => fallback.to_string(),
    }
}
