// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Binary codec for the accounting notification stream.
//!
//! A frame is a concatenation of operations. Each operation starts with a
//! one byte opcode followed by big-endian fixed-width integers and strings
//! encoded as a `u32` byte length plus UTF-8 bytes.

use thiserror::Error;

pub const OP_AUTH: u8 = 0;
pub const OP_WALLET: u8 = 1;
pub const OP_PROJECT: u8 = 2;
pub const OP_CATEGORY_INFO: u8 = 3;
pub const OP_USER_INFO: u8 = 4;
pub const OP_REPLAY_USER: u8 = 5;

/// Auth flag: ask the server to include locally retired usage.
pub const AUTH_FLAG_INCLUDE_RETIRED: u64 = 1 << 0;

pub const WALLET_FLAG_LOCKED: u32 = 1 << 0;
pub const WALLET_FLAG_PROJECT: u32 = 1 << 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },
    #[error("unknown opcode {opcode} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("string of {0} bytes does not fit a u32 length prefix")]
    StringTooLong(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Client to server, once per connection.
    Auth {
        replay_from_ms: u64,
        flags: u64,
        token: String,
    },
    Wallet {
        workspace_ref: u32,
        category_ref: u32,
        combined_quota: u64,
        flags: u32,
        last_update_ms: u64,
        local_retired_usage: u64,
    },
    Project {
        reference: u32,
        last_updated_ms: u64,
        project_json: String,
    },
    CategoryInfo {
        reference: u32,
        category_json: String,
    },
    UserInfo {
        reference: u32,
        username: String,
    },
    /// Client to server: resend everything relevant to one user.
    ReplayUser { username: String },
}

impl Op {
    pub fn opcode(&self) -> u8 {
        match self {
            Op::Auth { .. } => OP_AUTH,
            Op::Wallet { .. } => OP_WALLET,
            Op::Project { .. } => OP_PROJECT,
            Op::CategoryInfo { .. } => OP_CATEGORY_INFO,
            Op::UserInfo { .. } => OP_USER_INFO,
            Op::ReplayUser { .. } => OP_REPLAY_USER,
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_string(&mut self, value: &str) -> Result<(), CodecError> {
        let len = u32::try_from(value.len()).map_err(|_| CodecError::StringTooLong(value.len()))?;
        self.put_u32(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn put_op(&mut self, op: &Op) -> Result<(), CodecError> {
        self.put_u8(op.opcode());
        match op {
            Op::Auth {
                replay_from_ms,
                flags,
                token,
            } => {
                self.put_u64(*replay_from_ms);
                self.put_u64(*flags);
                self.put_string(token)
            }
            Op::Wallet {
                workspace_ref,
                category_ref,
                combined_quota,
                flags,
                last_update_ms,
                local_retired_usage,
            } => {
                self.put_u32(*workspace_ref);
                self.put_u32(*category_ref);
                self.put_u64(*combined_quota);
                self.put_u32(*flags);
                self.put_u64(*last_update_ms);
                self.put_u64(*local_retired_usage);
                Ok(())
            }
            Op::Project {
                reference,
                last_updated_ms,
                project_json,
            } => {
                self.put_u32(*reference);
                self.put_u64(*last_updated_ms);
                self.put_string(project_json)
            }
            Op::CategoryInfo {
                reference,
                category_json,
            } => {
                self.put_u32(*reference);
                self.put_string(category_json)
            }
            Op::UserInfo {
                reference,
                username,
            } => {
                self.put_u32(*reference);
                self.put_string(username)
            }
            Op::ReplayUser { username } => self.put_string(username),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Encodes a sequence of operations into one frame.
pub fn encode_frame(ops: &[Op]) -> Result<Vec<u8>, CodecError> {
    let mut writer = FrameWriter::new();
    for op in ops {
        writer.put_op(op)?;
    }
    Ok(writer.into_bytes())
}

/// Cursor over one received frame. As an iterator it yields each operation
/// in arrival order and stops for good after the first error.
#[derive(Debug)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < needed {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, CodecError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn get_string(&mut self) -> Result<String, CodecError> {
        let len = self.get_u32()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8 { offset })
    }

    fn read_op(&mut self) -> Result<Op, CodecError> {
        let offset = self.pos;
        let opcode = self.get_u8()?;
        let op = match opcode {
            OP_AUTH => Op::Auth {
                replay_from_ms: self.get_u64()?,
                flags: self.get_u64()?,
                token: self.get_string()?,
            },
            OP_WALLET => Op::Wallet {
                workspace_ref: self.get_u32()?,
                category_ref: self.get_u32()?,
                combined_quota: self.get_u64()?,
                flags: self.get_u32()?,
                last_update_ms: self.get_u64()?,
                local_retired_usage: self.get_u64()?,
            },
            OP_PROJECT => Op::Project {
                reference: self.get_u32()?,
                last_updated_ms: self.get_u64()?,
                project_json: self.get_string()?,
            },
            OP_CATEGORY_INFO => Op::CategoryInfo {
                reference: self.get_u32()?,
                category_json: self.get_string()?,
            },
            OP_USER_INFO => Op::UserInfo {
                reference: self.get_u32()?,
                username: self.get_string()?,
            },
            OP_REPLAY_USER => Op::ReplayUser {
                username: self.get_string()?,
            },
            opcode => return Err(CodecError::UnknownOpcode { opcode, offset }),
        };
        Ok(op)
    }
}

impl Iterator for FrameReader<'_> {
    type Item = Result<Op, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining() == 0 {
            return None;
        }
        let result = self.read_op();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

impl std::iter::FusedIterator for FrameReader<'_> {}

/// Decodes a whole frame, failing on the first malformed operation.
pub fn decode_frame(buf: &[u8]) -> Result<Vec<Op>, CodecError> {
    FrameReader::new(buf).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_ops() -> Vec<Op> {
        vec![
            Op::Auth {
                replay_from_ms: 1_700_000_000_123,
                flags: AUTH_FLAG_INCLUDE_RETIRED,
                token: "bearer-token".into(),
            },
            Op::CategoryInfo {
                reference: 7,
                category_json: r#"{"name":"u1-standard","provider":"hippo"}"#.into(),
            },
            Op::UserInfo {
                reference: 3,
                username: "alice#1234".into(),
            },
            Op::Project {
                reference: 11,
                last_updated_ms: 42,
                project_json: r#"{"id":"p1"}"#.into(),
            },
            Op::Wallet {
                workspace_ref: 3,
                category_ref: 7,
                combined_quota: u64::MAX,
                flags: WALLET_FLAG_LOCKED | WALLET_FLAG_PROJECT,
                last_update_ms: 99,
                local_retired_usage: 5,
            },
            Op::ReplayUser {
                username: "bøb".into(),
            },
        ]
    }

    #[test]
    fn every_operation_survives_encode_and_decode() {
        let ops = sample_ops();
        let frame = encode_frame(&ops).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), ops);
    }

    #[test]
    fn wallet_layout_is_big_endian_and_fixed_width() {
        let frame = encode_frame(&[Op::Wallet {
            workspace_ref: 1,
            category_ref: 2,
            combined_quota: 3,
            flags: WALLET_FLAG_LOCKED,
            last_update_ms: 4,
            local_retired_usage: 5,
        }])
        .unwrap();
        assert_eq!(frame.len(), 1 + 4 + 4 + 8 + 4 + 8 + 8);
        assert_eq!(frame[0], OP_WALLET);
        assert_eq!(&frame[1..5], &[0, 0, 0, 1]);
        assert_eq!(&frame[5..9], &[0, 0, 0, 2]);
        assert_eq!(&frame[17..21], &[0, 0, 0, 1]);
    }

    #[test]
    fn string_is_length_prefixed() {
        let frame = encode_frame(&[Op::ReplayUser {
            username: "ab".into(),
        }])
        .unwrap();
        assert_eq!(frame, vec![OP_REPLAY_USER, 0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let frame = encode_frame(&[Op::UserInfo {
            reference: 1,
            username: "alice".into(),
        }])
        .unwrap();
        let err = decode_frame(&frame[..frame.len() - 2]).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                offset: 9,
                needed: 5,
                available: 3
            }
        );
    }

    #[test]
    fn string_length_beyond_frame_is_rejected() {
        let mut frame = vec![OP_REPLAY_USER];
        frame.extend_from_slice(&100u32.to_be_bytes());
        frame.extend_from_slice(b"short");
        assert!(matches!(
            decode_frame(&frame),
            Err(CodecError::Truncated { needed: 100, .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut frame = vec![OP_REPLAY_USER];
        frame.extend_from_slice(&2u32.to_be_bytes());
        frame.extend_from_slice(&[0xff, 0xfe]);
        assert_eq!(
            decode_frame(&frame).unwrap_err(),
            CodecError::InvalidUtf8 { offset: 5 }
        );
    }

    #[test]
    fn reader_stops_after_first_error() {
        let mut frame = encode_frame(&[Op::UserInfo {
            reference: 1,
            username: "alice".into(),
        }])
        .unwrap();
        frame.push(42);
        frame.extend_from_slice(&encode_frame(&[Op::ReplayUser { username: "x".into() }]).unwrap());

        let mut reader = FrameReader::new(&frame);
        assert!(matches!(reader.next(), Some(Ok(Op::UserInfo { .. }))));
        assert_eq!(
            reader.next(),
            Some(Err(CodecError::UnknownOpcode {
                opcode: 42,
                offset: 14
            }))
        );
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn empty_frame_decodes_to_nothing() {
        assert!(decode_frame(&[]).unwrap().is_empty());
    }
}
