/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use quick_protobuf::{BytesReader, MessageRead, MessageWrite, Writer};

pub const ZEROS: [u8; 16384] = [0u8; 16384];

/// Parse a protobuf message from raw (non-length-prefixed) bytes.
pub fn read_protobuf<'a, M: MessageRead<'a>>(data: &'a [u8]) -> quick_protobuf::Result<M> {
    let mut reader = BytesReader::from_bytes(data);
    M::from_reader(&mut reader, data)
}

/// Serialize a protobuf message to raw (non-length-prefixed) bytes.
pub fn write_protobuf<M: MessageWrite>(message: &M) -> quick_protobuf::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(message.get_size());
    let mut writer = Writer::new(&mut buf);
    message.write_message(&mut writer)?;
    Ok(buf)
}
