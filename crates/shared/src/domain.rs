use std::{fmt, path::Path};

use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier assigned by the remote service.
///
/// The service emits integer ids while the client keeps them as strings, so
/// deserialization accepts either form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Text(text) if text.is_empty() => {
                Err(de::Error::invalid_value(de::Unexpected::Str(""), &"a non-empty id"))
            }
            RawId::Text(text) => Ok(Self(text)),
            RawId::Signed(n) => Ok(Self(n.to_string())),
            RawId::Unsigned(n) => Ok(Self(n.to_string())),
        }
    }
}

/// Locally generated id of an upload task. Never sent to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadTaskId(pub Uuid);

impl UploadTaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Text,
    Audio,
    Image,
}

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "doc", "docx"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Image => "image",
        }
    }

    /// Classifies a file by extension using the upload drop-target rules.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let extension = Path::new(file_name)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        let extension = extension.as_str();

        if TEXT_EXTENSIONS.contains(&extension) {
            Some(Self::Text)
        } else if AUDIO_EXTENSIONS.contains(&extension) {
            Some(Self::Audio)
        } else if IMAGE_EXTENSIONS.contains(&extension) {
            Some(Self::Image)
        } else {
            None
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown entry type '{0}', expected text, audio or image")]
pub struct UnknownEntryType(pub String);

impl std::str::FromStr for EntryType {
    type Err = UnknownEntryType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "audio" => Ok(Self::Audio),
            "image" => Ok(Self::Image),
            other => Err(UnknownEntryType(other.to_string())),
        }
    }
}
