use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Argument,
    Load,
    NotFound,
    Execution,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Internal => "InternalError",
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::Load => "LoadError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Execution => "ExecutionError",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    path: Option<PathBuf>,
    key: Option<i64>,
    line: Option<u32>,
    column: Option<u32>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            path: None,
            key: None,
            line: None,
            column: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn key(&self) -> Option<i64> {
        self.key
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn column(&self) -> Option<u32> {
        self.column
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_key(mut self, key: i64) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Exception object handed to hosts: `kind` and `message` are always
    /// present, location fields only when known.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("kind".to_string(), json!(self.kind.label()));
        obj.insert(
            "message".to_string(),
            json!(self.message.clone().unwrap_or_default()),
        );
        if let Some(path) = &self.path {
            obj.insert(
                "resourceName".to_string(),
                json!(path.to_string_lossy()),
            );
        }
        if let Some(line) = self.line {
            obj.insert("lineNum".to_string(), json!(line));
        }
        if let Some(column) = self.column {
            obj.insert("column".to_string(), json!(column));
        }
        if let Some(key) = self.key {
            obj.insert("key".to_string(), json!(key));
        }
        Value::Object(obj)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.label())?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(key) = self.key {
            write!(f, " (key: {key})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, " (line {line}, column {column})")?,
            (Some(line), None) => write!(f, " (line {line})")?,
            _ => {}
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_status_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Argument => 2,
        ErrorKind::Load => 3,
        ErrorKind::NotFound => 4,
        ErrorKind::Execution => 5,
    }
}
