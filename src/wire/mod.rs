//! The fixed-layout message that carries every client and storage-server
//! operation (§6 of the spec). A single struct shape serves both requests
//! and responses; `msg_type` and `error_code` discriminate which.

pub mod primitive;

use std::fmt;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use tokio::io::{AsyncRead, AsyncWrite};

/// Maximum bytes in `filename`/`checkpoint_tag`/`username` fields.
pub const MAX_NAME_LEN: usize = 255;
/// Maximum bytes in the `folder` field.
pub const MAX_PATH_LEN: usize = 1024;
/// Maximum bytes in the `ss_ip` field.
pub const MAX_IP_LEN: usize = 64;
/// Maximum bytes in the bounded `data` payload.
pub const MAX_DATA_LEN: usize = 4 * 1024 * 1024;

/// Errors raised while decoding or encoding a [`Message`].
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    TooLarge { len: usize, max_len: usize },
    BadUtf8,
    BadDiscriminant(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::TooLarge { len, max_len } => {
                write!(f, "field of {len} bytes exceeds limit of {max_len}")
            }
            Error::BadUtf8 => write!(f, "field is not valid UTF-8"),
            Error::BadDiscriminant(v) => write!(f, "unknown wire discriminant {v}"),
        }
    }
}

impl std::error::Error for Error {}

/// Discriminates the operation carried by a [`Message`] (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum MessageType {
    RegisterClient = 0,
    RegisterSs = 1,
    Create = 2,
    Read = 3,
    Write = 4,
    Delete = 5,
    Stream = 6,
    Info = 7,
    View = 8,
    ListSs = 9,
    ListUsers = 10,
    Search = 11,
    CreateFolder = 12,
    ViewFolder = 13,
    Move = 14,
    Checkpoint = 15,
    ViewCheckpoint = 16,
    Revert = 17,
    ListCheckpoints = 18,
    Undo = 19,
    Exec = 20,
    AddAccess = 21,
    RemAccess = 22,
    RequestAccess = 23,
    ViewRequests = 24,
    RespondRequest = 25,
    Heartbeat = 26,
    Replicate = 27,
    Shutdown = 28,
}

impl MessageType {
    fn from_wire(v: u32) -> Result<Self, Error> {
        FromPrimitive::from_u32(v).ok_or(Error::BadDiscriminant(v))
    }

    fn to_wire(self) -> u32 {
        ToPrimitive::to_u32(&self).expect("MessageType always fits in u32")
    }
}

/// Response status carried in `error_code` (§6). `Success`/`SsInfo` are the
/// only non-error outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    SsInfo = 1,
    FileNotFound = 2,
    FileExists = 3,
    PermissionDenied = 4,
    SsUnavailable = 5,
    InvalidRequest = 6,
    FolderExists = 7,
    FolderNotFound = 8,
    CheckpointNotFound = 9,
    RequestNotFound = 10,
    FileLocked = 11,
    ServerError = 12,
}

impl ErrorCode {
    fn from_wire(v: u32) -> Result<Self, Error> {
        FromPrimitive::from_u32(v).ok_or(Error::BadDiscriminant(v))
    }

    fn to_wire(self) -> u32 {
        ToPrimitive::to_u32(&self).expect("ErrorCode always fits in u32")
    }

    /// Whether this code represents a successful outcome (either a plain
    /// success or a follow-up SS endpoint).
    pub fn is_ok(self) -> bool {
        matches!(self, ErrorCode::Success | ErrorCode::SsInfo)
    }
}

/// The single message shape used for every request and response.
#[derive(Debug, Clone)]
pub struct Message {
    pub msg_type: MessageType,
    pub filename: String,
    pub username: String,
    pub folder: String,
    pub checkpoint_tag: String,
    pub request_id: u64,
    pub sentence_num: u32,
    pub flags: u32,
    pub error_code: ErrorCode,
    pub ss_ip: String,
    pub ss_port: u32,
    pub data: Vec<u8>,
}

impl Message {
    /// A bare request with every optional field zeroed/empty.
    pub fn request(msg_type: MessageType) -> Self {
        Message {
            msg_type,
            filename: String::new(),
            username: String::new(),
            folder: String::new(),
            checkpoint_tag: String::new(),
            request_id: 0,
            sentence_num: 0,
            flags: 0,
            error_code: ErrorCode::Success,
            ss_ip: String::new(),
            ss_port: 0,
            data: Vec::new(),
        }
    }

    /// A success reply echoing `msg_type`, carrying `data` as the payload.
    pub fn success(msg_type: MessageType, data: Vec<u8>) -> Self {
        Message { error_code: ErrorCode::Success, data, ..Message::request(msg_type) }
    }

    /// An error reply; `text` is carried as the UTF-8 payload so the caller
    /// can present a descriptive message (§7).
    pub fn error(msg_type: MessageType, code: ErrorCode, text: impl Into<String>) -> Self {
        Message { error_code: code, data: text.into().into_bytes(), ..Message::request(msg_type) }
    }

    /// A `RESP_SS_INFO` reply pointing the caller at a storage server.
    pub fn ss_info(msg_type: MessageType, ip: impl Into<String>, port: u32) -> Self {
        Message {
            error_code: ErrorCode::SsInfo,
            ss_ip: ip.into(),
            ss_port: port,
            ..Message::request(msg_type)
        }
    }

    /// Reads one framed message from `r`.
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, Error> {
        use primitive::*;

        let msg_type = MessageType::from_wire(read_u32(r).await?)?;
        let filename = read_string(r, MAX_NAME_LEN).await?;
        let username = read_string(r, MAX_NAME_LEN).await?;
        let folder = read_string(r, MAX_PATH_LEN).await?;
        let checkpoint_tag = read_string(r, MAX_NAME_LEN).await?;
        let request_id = read_u64(r).await?;
        let sentence_num = read_u32(r).await?;
        let flags = read_u32(r).await?;
        let error_code = ErrorCode::from_wire(read_u32(r).await?)?;
        let ss_ip = read_string(r, MAX_IP_LEN).await?;
        let ss_port = read_u32(r).await?;
        let data = read_bytes(r, MAX_DATA_LEN).await?;

        Ok(Message {
            msg_type,
            filename,
            username,
            folder,
            checkpoint_tag,
            request_id,
            sentence_num,
            flags,
            error_code,
            ss_ip,
            ss_port,
            data,
        })
    }

    /// Writes one framed message to `w`.
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<(), Error> {
        use primitive::*;

        write_u32(w, self.msg_type.to_wire()).await?;
        write_string(w, &self.filename).await?;
        write_string(w, &self.username).await?;
        write_string(w, &self.folder).await?;
        write_string(w, &self.checkpoint_tag).await?;
        write_u64(w, self.request_id).await?;
        write_u32(w, self.sentence_num).await?;
        write_u32(w, self.flags).await?;
        write_u32(w, self.error_code.to_wire()).await?;
        write_string(w, &self.ss_ip).await?;
        write_u32(w, self.ss_port).await?;
        write_bytes(w, &self.data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_through_the_wire() {
        let mut msg = Message::request(MessageType::Create);
        msg.filename = "notes.txt".into();
        msg.username = "alice".into();
        msg.flags = 3;
        msg.data = b"hello".to_vec();

        let mut buf = Vec::new();
        msg.write(&mut buf).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = Message::read(&mut cursor).await.unwrap();

        assert_eq!(decoded.msg_type, MessageType::Create);
        assert_eq!(decoded.filename, "notes.txt");
        assert_eq!(decoded.username, "alice");
        assert_eq!(decoded.flags, 3);
        assert_eq!(decoded.data, b"hello");
    }

    #[tokio::test]
    async fn rejects_oversized_filename() {
        let mut buf = Vec::new();
        primitive::write_u32(&mut buf, MessageType::Create.to_wire()).await.unwrap();
        primitive::write_u32(&mut buf, (MAX_NAME_LEN + 1) as u32).await.unwrap();
        buf.extend(std::iter::repeat(b'x').take(MAX_NAME_LEN + 1));

        let mut cursor = Cursor::new(buf);
        let err = Message::read(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::TooLarge { .. }));
    }
}
