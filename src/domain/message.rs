//! Application messages and fragment reassembly.

use bytes::{Bytes, BytesMut};

use super::frame::{Frame, Opcode};
use crate::shared::error::FrameError;

/// Default maximum reassembled message (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// A complete application message, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Text(_) => Opcode::Text,
            Message::Binary(_) => Opcode::Binary,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Caller-requested close. At most one is honored per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub code: u16,
    pub reason: String,
}

impl CloseRequest {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Collects data frames into messages.
///
/// Only Text, Binary and Continuation frames are pushed here; control frames
/// are handled by the caller and never touch the pending buffer.
#[derive(Debug)]
pub struct MessageAssembler {
    pending: Option<(Opcode, BytesMut)>,
    max_message_size: usize,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            pending: None,
            max_message_size,
        }
    }

    /// True while a fragmented message is open.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any half-received message.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feed one data frame. Returns the message once the final fragment arrives.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, FrameError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.pending.is_some() {
                    return Err(FrameError::InterleavedDataFrame);
                }
                self.check_size(frame.payload.len())?;
                if frame.fin {
                    return finish(frame.opcode, BytesMut::from(frame.payload.as_ref())).map(Some);
                }
                self.pending = Some((frame.opcode, BytesMut::from(frame.payload.as_ref())));
                Ok(None)
            }
            Opcode::Continuation => {
                let Some((_, buffer)) = self.pending.as_ref() else {
                    return Err(FrameError::UnexpectedContinuation);
                };
                self.check_size(buffer.len() + frame.payload.len())?;

                let Some((opcode, mut buffer)) = self.pending.take() else {
                    return Err(FrameError::UnexpectedContinuation);
                };
                buffer.extend_from_slice(&frame.payload);
                if frame.fin {
                    finish(opcode, buffer).map(Some)
                } else {
                    self.pending = Some((opcode, buffer));
                    Ok(None)
                }
            }
            other => Err(FrameError::InvalidOpcode(other as u8)),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), FrameError> {
        if size > self.max_message_size {
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

fn finish(opcode: Opcode, buffer: BytesMut) -> Result<Message, FrameError> {
    match opcode {
        Opcode::Text => String::from_utf8(buffer.to_vec())
            .map(Message::Text)
            .map_err(|_| FrameError::InvalidUtf8),
        _ => Ok(Message::Binary(buffer.freeze())),
    }
}
