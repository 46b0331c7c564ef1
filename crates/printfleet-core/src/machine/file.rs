//! File handles.

use serde::{Deserialize, Serialize};

use crate::ids::MachineId;

/// Handle to a file exposed by a machine. The SHA-256 hash identifies the
/// content; the URI locates it on the machine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileHandle {
    /// Owning machine.
    #[serde(rename = "MachineID")]
    pub machine_id: MachineId,
    /// Location on the machine.
    #[serde(rename = "URI")]
    pub uri: String,
    /// Content type.
    #[serde(rename = "MIME")]
    pub mime: String,
    /// Uppercase hex SHA-256 of the content.
    #[serde(rename = "HashSHA256")]
    pub hash_sha256: String,
}

impl FileHandle {
    /// Build a handle.
    pub fn new(
        machine_id: MachineId,
        uri: impl Into<String>,
        mime: impl Into<String>,
        hash_sha256: impl Into<String>,
    ) -> Self {
        Self {
            machine_id,
            uri: uri.into(),
            mime: mime.into(),
            hash_sha256: hash_sha256.into().to_ascii_uppercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names() {
        let handle = FileHandle::new(MachineId::from("m1"), "/sd/a.gcode", "text/x-gcode", "ab12");
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "MachineID": "m1",
                "URI": "/sd/a.gcode",
                "MIME": "text/x-gcode",
                "HashSHA256": "AB12",
            })
        );
    }
}
