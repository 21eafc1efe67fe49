//! File read, write and directory listing for `file:*` requests.

use std::path::Path;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use warlock_protocol::DirEntry;

/// Errors from file operations.
#[derive(Debug, thiserror::Error)]
pub enum FileOpError {
    /// Filesystem access failed.
    #[error("{path}: {source}")]
    Io {
        /// Path that was accessed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The requested encoding is not supported.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Content could not be decoded or encoded with the requested encoding.
    #[error("Invalid {encoding} content: {message}")]
    InvalidContent {
        /// Encoding in use.
        encoding: Encoding,
        /// What went wrong.
        message: String,
    },
}

impl FileOpError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Content encodings accepted by `file:read` and `file:write`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 text. Reading non-UTF-8 data is an error.
    #[default]
    Utf8,
    /// Standard base64.
    Base64,
    /// Lower-case hexadecimal.
    Hex,
    /// One byte per `char` (ISO-8859-1).
    Latin1,
}

impl Encoding {
    /// Parse an optional encoding name, defaulting to UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`FileOpError::UnsupportedEncoding`] for unknown names.
    pub fn parse(name: Option<&str>) -> Result<Self, FileOpError> {
        name.map_or(Ok(Self::default()), str::parse::<Self>)
    }

    /// Render raw bytes as a string in this encoding.
    ///
    /// # Errors
    ///
    /// Returns [`FileOpError::InvalidContent`] if `Utf8` is requested for
    /// bytes that are not valid UTF-8.
    pub fn encode(self, bytes: Vec<u8>) -> Result<String, FileOpError> {
        match self {
            Self::Utf8 => String::from_utf8(bytes).map_err(|e| self.invalid(e)),
            Self::Base64 => Ok(BASE64.encode(bytes)),
            Self::Hex => Ok(hex::encode(bytes)),
            Self::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        }
    }

    /// Decode a string in this encoding to raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FileOpError::InvalidContent`] for malformed base64 or hex,
    /// or for `Latin1` content containing characters above U+00FF.
    pub fn decode(self, content: &str) -> Result<Vec<u8>, FileOpError> {
        match self {
            Self::Utf8 => Ok(content.as_bytes().to_vec()),
            Self::Base64 => BASE64.decode(content.trim()).map_err(|e| self.invalid(e)),
            Self::Hex => hex::decode(content.trim()).map_err(|e| self.invalid(e)),
            Self::Latin1 => content
                .chars()
                .map(|c| u8::try_from(c).map_err(|_| self.invalid(format!("{c:?} is not Latin-1"))))
                .collect(),
        }
    }

    fn invalid(self, message: impl std::fmt::Display) -> FileOpError {
        FileOpError::InvalidContent {
            encoding: self,
            message: message.to_string(),
        }
    }
}

impl FromStr for Encoding {
    type Err = FileOpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "base64" => Ok(Self::Base64),
            "hex" => Ok(Self::Hex),
            "latin1" | "binary" => Ok(Self::Latin1),
            _ => Err(FileOpError::UnsupportedEncoding(s.to_owned())),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Utf8 => "utf8",
            Self::Base64 => "base64",
            Self::Hex => "hex",
            Self::Latin1 => "latin1",
        })
    }
}

/// Read `path` and render it in `encoding`.
///
/// # Errors
///
/// Returns a [`FileOpError`] if the file cannot be read or rendered.
pub async fn read_file(path: &Path, encoding: Encoding) -> Result<String, FileOpError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| FileOpError::io(path, e))?;
    encoding.encode(bytes)
}

/// Decode `content` with `encoding` and write it to `path`, creating or
/// truncating the file.
///
/// # Errors
///
/// Returns a [`FileOpError`] if decoding or writing fails. Nothing is
/// written when decoding fails.
pub async fn write_file(path: &Path, content: &str, encoding: Encoding) -> Result<(), FileOpError> {
    let bytes = encoding.decode(content)?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| FileOpError::io(path, e))
}

/// Immediate entries of directory `path`, sorted by name.
///
/// # Errors
///
/// Returns a [`FileOpError`] if the directory cannot be read.
pub async fn list_dir(path: &Path) -> Result<Vec<DirEntry>, FileOpError> {
    let mut dir = tokio::fs::read_dir(path)
        .await
        .map_err(|e| FileOpError::io(path, e))?;
    let mut entries = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| FileOpError::io(path, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| FileOpError::io(&entry.path(), e))?;
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_directory: file_type.is_dir(),
            is_file: file_type.is_file(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
