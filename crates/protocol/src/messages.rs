//! The tagged union of protocol messages.
//!
//! Every message is a JSON object discriminated by its `type` field. Byte
//! payloads (`data`, public keys) travel as standard base64 strings.

use serde::{Deserialize, Serialize};

/// Stable machine-readable error codes.
///
/// `errorCode` is the field automation matches on; `message` is for humans.
/// Unknown codes from a newer peer deserialize to [`ErrorCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessage,
    InvalidCommand,
    Unauthorized,
    AuthInvalidCredentials,
    UploadNotInitialized,
    InvalidPath,
    FileNotFound,
    PermissionDenied,
    NotAFile,
    IoError,
    InternalError,
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// The wire spelling of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::InvalidCommand => "INVALID_COMMAND",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::AuthInvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            ErrorCode::UploadNotInitialized => "UPLOAD_NOT_INITIALIZED",
            ErrorCode::InvalidPath => "INVALID_PATH",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::NotAFile => "NOT_A_FILE",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a directory entry in a `LIST_RESULT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One directory entry. `size` is present only for files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A protocol message, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    ClientHello {
        version: u32,
        cipher: String,
        kex: String,
        client_public_key: String,
    },
    #[serde(rename_all = "camelCase")]
    ServerHello {
        ok: bool,
        version: u32,
        cipher: String,
        kex: String,
        server_public_key: String,
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Auth {
        username: String,
        password: String,
    },
    AuthOk,
    #[serde(rename_all = "camelCase")]
    AuthError {
        error: String,
        error_code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    PutBegin {
        path: String,
        size: u64,
    },
    PutChunk {
        path: String,
        offset: u64,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    PutEnd {
        path: String,
    },
    PutOk {
        path: String,
    },

    GetBegin {
        path: String,
    },
    GetMeta {
        path: String,
        size: u64,
    },
    GetChunk {
        path: String,
        offset: u64,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    GetEnd {
        path: String,
    },

    List {
        path: String,
    },
    ListResult {
        path: String,
        items: Vec<ListItem>,
    },

    Del {
        path: String,
    },
    DelOk {
        path: String,
    },
    /// Deletion failures use a typed shape instead of the `ERROR` envelope
    /// so clients can match on `type`. The `error` field duplicates
    /// `message` for legacy clients.
    #[serde(rename_all = "camelCase")]
    DelError {
        path: String,
        error_code: ErrorCode,
        message: String,
        error: String,
    },

    Info,
    #[serde(rename_all = "camelCase")]
    InfoResult {
        version: String,
        protocol_version: u32,
        capabilities: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        storage_root: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_upload_size: Option<u64>,
    },

    Bye,

    #[serde(rename_all = "camelCase")]
    Error {
        error: String,
        error_code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl Message {
    /// Builds an `ERROR` envelope; `error` mirrors `message`.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Message::Error {
            error: message.clone(),
            error_code: code,
            message,
            details: None,
        }
    }

    /// Builds a `DEL_ERROR`; the `error` alias mirrors `message`.
    pub fn del_error(path: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Message::DelError {
            path: path.into(),
            error_code: code,
            message: message.clone(),
            error: message,
        }
    }

    /// The wire tag of this message, for logging and diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::ClientHello { .. } => "CLIENT_HELLO",
            Message::ServerHello { .. } => "SERVER_HELLO",
            Message::Auth { .. } => "AUTH",
            Message::AuthOk => "AUTH_OK",
            Message::AuthError { .. } => "AUTH_ERROR",
            Message::PutBegin { .. } => "PUT_BEGIN",
            Message::PutChunk { .. } => "PUT_CHUNK",
            Message::PutEnd { .. } => "PUT_END",
            Message::PutOk { .. } => "PUT_OK",
            Message::GetBegin { .. } => "GET_BEGIN",
            Message::GetMeta { .. } => "GET_META",
            Message::GetChunk { .. } => "GET_CHUNK",
            Message::GetEnd { .. } => "GET_END",
            Message::List { .. } => "LIST",
            Message::ListResult { .. } => "LIST_RESULT",
            Message::Del { .. } => "DEL",
            Message::DelOk { .. } => "DEL_OK",
            Message::DelError { .. } => "DEL_ERROR",
            Message::Info => "INFO",
            Message::InfoResult { .. } => "INFO_RESULT",
            Message::Bye => "BYE",
            Message::Error { .. } => "ERROR",
        }
    }
}

/// Every tag the schema understands, used to classify decode failures.
const KNOWN_TYPES: &[&str] = &[
    "CLIENT_HELLO",
    "SERVER_HELLO",
    "AUTH",
    "AUTH_OK",
    "AUTH_ERROR",
    "PUT_BEGIN",
    "PUT_CHUNK",
    "PUT_END",
    "PUT_OK",
    "GET_BEGIN",
    "GET_META",
    "GET_CHUNK",
    "GET_END",
    "LIST",
    "LIST_RESULT",
    "DEL",
    "DEL_OK",
    "DEL_ERROR",
    "INFO",
    "INFO_RESULT",
    "BYE",
    "ERROR",
];

/// Why a decrypted payload failed to decode.
///
/// The distinctions matter to the session actor: unreadable JSON is a
/// protocol break, an unknown tag gets `INVALID_COMMAND`, and a known tag
/// with a bad field set gets `INVALID_MESSAGE` while the session survives.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Unreadable(#[source] serde_json::Error),

    #[error("message has no usable `type` field")]
    MissingType,

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("invalid fields for `{msg_type}`: {source}")]
    Schema {
        msg_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes one decrypted payload into a [`Message`].
pub fn decode_message(payload: &[u8]) -> Result<Message, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(DecodeError::Unreadable)?;

    let msg_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(str::to_owned);

    match serde_json::from_value::<Message>(value) {
        Ok(msg) => Ok(msg),
        Err(source) => match msg_type {
            None => Err(DecodeError::MissingType),
            Some(t) if KNOWN_TYPES.contains(&t.as_str()) => {
                Err(DecodeError::Schema { msg_type: t, source })
            }
            Some(t) => Err(DecodeError::UnknownType(t)),
        },
    }
}

/// Base64 serde adapter for binary payload fields.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
