use crate::error::RoomError;
use std::fmt;
use url::Url;

/// Name of the room joined for the whole session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomIdentity {
    name: String,
}

impl RoomIdentity {
    pub fn new(name: impl Into<String>) -> Result<Self, RoomError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RoomError::Config("room name is empty".to_string()));
        }
        Ok(Self { name })
    }

    /// Room named by an entry URL of the form `<scheme>://<host>/<prefix>/<room>`
    pub fn from_entry_url(entry_url: &str) -> Result<Self, RoomError> {
        let url = Url::parse(entry_url)
            .map_err(|e| RoomError::Config(format!("invalid entry URL {}: {}", entry_url, e)))?;
        let name = url
            .path_segments()
            .and_then(|mut segments| segments.nth(1))
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| RoomError::Config(format!("entry URL {} names no room", entry_url)))?;
        Self::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RoomIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
