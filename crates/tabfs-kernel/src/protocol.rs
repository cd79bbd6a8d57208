//! Wire records exchanged with the filesystem driver.
//!
//! Both directions are JSON objects. Binary payloads travel in `buf` as
//! standard base64 and are decoded/encoded only here; route handlers see
//! raw bytes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Errno, FsError, FsResult};
use crate::types::{Attr, Reply};

/// An operation record as received from the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    pub op: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fh: Option<u64>,
}

impl WireRequest {
    pub fn new(id: u64, op: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id,
            op: op.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_fh(mut self, fh: u64) -> Self {
        self.fh = Some(fh);
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set `buf` from raw bytes.
    pub fn with_data(mut self, data: impl AsRef<[u8]>) -> Self {
        self.buf = Some(encode(data));
        self
    }

    /// Decoded `buf`, empty if absent.
    pub fn data(&self) -> FsResult<Vec<u8>> {
        match &self.buf {
            Some(buf) => decode(buf),
            None => Ok(Vec::new()),
        }
    }
}

/// The `id`/`op` of a record that failed to parse as a [`WireRequest`],
/// used to still answer it.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordHeader {
    pub id: u64,
    pub op: String,
}

/// A response record sent back to the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    pub id: u64,
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub st_mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub st_nlink: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub st_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fh: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl WireResponse {
    fn empty(id: u64, op: impl Into<String>) -> Self {
        Self {
            id,
            op: op.into(),
            ..Default::default()
        }
    }

    /// Error response carrying `errno`.
    pub fn error(id: u64, op: impl Into<String>, errno: Errno) -> Self {
        Self {
            error: Some(errno.code()),
            ..Self::empty(id, op)
        }
    }

    /// Error response for `err`.
    pub fn from_error(id: u64, op: impl Into<String>, err: &FsError) -> Self {
        Self::error(id, op, err.errno())
    }

    /// Success response carrying `reply`.
    pub fn from_reply(id: u64, op: impl Into<String>, reply: Reply) -> Self {
        let mut resp = Self::empty(id, op);
        match reply {
            Reply::Attr(Attr {
                st_mode,
                st_nlink,
                st_size,
            }) => {
                resp.st_mode = Some(st_mode);
                resp.st_nlink = Some(st_nlink);
                resp.st_size = Some(st_size);
            }
            Reply::Entries(entries) => resp.entries = Some(entries),
            Reply::Handle(fh) => resp.fh = Some(fh),
            Reply::Data(data) => resp.buf = Some(encode(data)),
            Reply::Link(target) => resp.buf = Some(encode(target)),
            Reply::Written(n) => resp.size = Some(n as u64),
            Reply::Empty => {}
        }
        resp
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Decoded `buf`, empty if absent.
    pub fn data(&self) -> FsResult<Vec<u8>> {
        match &self.buf {
            Some(buf) => decode(buf),
            None => Ok(Vec::new()),
        }
    }
}

/// Standard base64.
pub fn encode(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

pub fn decode(text: &str) -> FsResult<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| FsError::io(format!("bad base64 payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::mode;

    #[test]
    fn test_request_optional_fields() {
        let req: WireRequest =
            serde_json::from_str(r#"{"id":7,"op":"getattr","path":"/tabs"}"#).unwrap();
        assert_eq!(req, WireRequest::new(7, "getattr", "/tabs"));
        assert!(req.data().unwrap().is_empty());
    }

    #[test]
    fn test_request_buf_is_base64() {
        let req: WireRequest = serde_json::from_str(
            r#"{"id":1,"op":"write","path":"/f","buf":"aGVsbG8=","offset":0,"fh":3}"#,
        )
        .unwrap();
        assert_eq!(req.data().unwrap(), b"hello");
        assert_eq!(req.fh, Some(3));

        let bad = WireRequest::new(1, "write", "/f");
        let bad = WireRequest {
            buf: Some("!!!".into()),
            ..bad
        };
        assert!(matches!(bad.data(), Err(FsError::Io(_))));
    }

    #[test]
    fn test_response_skips_absent_fields() {
        let resp = WireResponse::from_reply(3, "open", Reply::Handle(9));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, serde_json::json!({"id": 3, "op": "open", "fh": 9}));
    }

    #[test]
    fn test_attr_response() {
        let resp = WireResponse::from_reply(1, "getattr", Reply::Attr(Attr::directory(mode::DIR_DEFAULT)));
        assert_eq!(resp.st_mode, Some(mode::S_IFDIR | 0o755));
        assert_eq!(resp.st_nlink, Some(3));
        assert_eq!(resp.st_size, Some(0));
        assert!(!resp.is_error());
    }

    #[test]
    fn test_link_and_data_encoded() {
        let resp = WireResponse::from_reply(1, "readlink", Reply::Link("../by-id/4".into()));
        assert_eq!(resp.buf.as_deref(), Some("Li4vYnktaWQvNA=="));
        let resp = WireResponse::from_reply(2, "read", Reply::Data(vec![0, 255]));
        assert_eq!(resp.data().unwrap(), vec![0, 255]);
    }

    #[test]
    fn test_error_response() {
        let resp = WireResponse::from_error(5, "read", &FsError::TimedOut);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, serde_json::json!({"id": 5, "op": "read", "error": 110}));
    }

    #[test]
    fn test_header_salvaged_from_bad_record() {
        let raw = r#"{"id":4,"op":"read","path":17}"#;
        assert!(serde_json::from_str::<WireRequest>(raw).is_err());
        let header: RecordHeader = serde_json::from_str(raw).unwrap();
        assert_eq!(header.id, 4);
        assert_eq!(header.op, "read");
    }
}
