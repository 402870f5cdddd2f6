//! Model worker wire protocol.
//! Frames are a 4-byte big-endian length followed by a MessagePack map.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize, Serializer};

use super::WorkerError;

/// Largest frame accepted in either direction.
pub const MAX_MESSAGE_BYTES: usize = 50 * 1024 * 1024;

/// Write one length-prefixed frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), WorkerError> {
    if payload.len() > MAX_MESSAGE_BYTES {
        return Err(WorkerError::MessageTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, WorkerError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_BYTES {
        return Err(WorkerError::MessageTooLarge(msg_len));
    }
    let mut payload = vec![0u8; msg_len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest<'a> {
    Ping,
    Describe,
    /// Landmarks for one frame of `session`. The worker keeps one tracker
    /// per session, so a session's frames must stay on one worker.
    Extract {
        session: &'a str,
        #[serde(serialize_with = "as_bytes")]
        image: &'a [u8],
        mirror: bool,
    },
    /// Drop the tracker held for `session`.
    Release {
        session: &'a str,
    },
    /// `data` is `frames × dim` little-endian f32, oldest frame first.
    Classify {
        frames: usize,
        dim: usize,
        #[serde(serialize_with = "as_bytes")]
        data: &'a [u8],
    },
    Generate {
        text: &'a str,
        max_length: u32,
    },
    Shutdown,
}

fn as_bytes<S: Serializer>(data: &&[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_bytes(data)
}

impl WorkerRequest<'_> {
    pub fn encode(&self) -> Result<Vec<u8>, WorkerError> {
        // Named encoding: the worker reads maps, not positional arrays.
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::Ping => "ping",
            WorkerRequest::Describe => "describe",
            WorkerRequest::Extract { .. } => "extract",
            WorkerRequest::Release { .. } => "release",
            WorkerRequest::Classify { .. } => "classify",
            WorkerRequest::Generate { .. } => "generate",
            WorkerRequest::Shutdown => "shutdown",
        }
    }
}

/// Flat response; which fields are set depends on `msg_type`.
#[derive(Deserialize, Debug, Default)]
pub struct WorkerResponse {
    #[serde(rename = "type")]
    pub msg_type: String,
    // describe
    pub keypoint_dim: Option<usize>,
    pub num_classes: Option<usize>,
    pub generator_loaded: Option<bool>,
    // landmarks
    pub pose: Option<Vec<[f32; 4]>>,
    pub face: Option<Vec<[f32; 3]>>,
    pub left_hand: Option<Vec<[f32; 3]>>,
    pub right_hand: Option<Vec<[f32; 3]>>,
    // prediction
    pub index: Option<usize>,
    pub confidence: Option<f32>,
    // sentence
    pub text: Option<String>,
    // error
    pub kind: Option<String>,
    pub message: Option<String>,
    pub elapsed_ms: Option<f64>,
}

impl WorkerResponse {
    pub fn decode(bytes: &[u8]) -> Result<Self, WorkerError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Turn an `error` response into `Err`, and check the expected type otherwise.
    pub fn expect_type(self, expected: &str) -> Result<Self, WorkerError> {
        if self.msg_type == "error" {
            return Err(WorkerError::Remote {
                kind: self.kind.unwrap_or_else(|| "unknown".into()),
                message: self.message.unwrap_or_else(|| "unknown error".into()),
            });
        }
        if self.msg_type != expected {
            return Err(WorkerError::UnexpectedResponse {
                expected: expected.to_string(),
                actual: self.msg_type,
            });
        }
        Ok(self)
    }
}

/// Flatten f32 samples to little-endian bytes.
pub fn f32_le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
