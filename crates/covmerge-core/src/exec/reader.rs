//! Execution-data decoding.

use std::io::{self, BufReader, Read};
use std::path::Path;

use super::{
    ExecutionData, ExecutionStore, SessionInfo, BLOCK_EXECUTION_DATA, BLOCK_HEADER,
    BLOCK_SESSION_INFO, FORMAT_VERSION, MAGIC_NUMBER,
};
use crate::domain::TraceError;

/// Upper bound on probes per class; real classes stay far below this.
const MAX_PROBES: u64 = 1 << 24;

/// Decode a complete execution-data stream.
///
/// An empty stream is valid and yields an empty store. The first block must
/// be a header; further headers (from concatenated dumps) are accepted as
/// long as they carry the same format version.
pub fn read_exec<R: Read>(input: R) -> Result<ExecutionStore, TraceError> {
    let mut input = DataInput::new(input);
    let mut store = ExecutionStore::new();
    let mut first = true;

    while let Some(block) = input.next_block_type()? {
        if first && block != BLOCK_HEADER {
            return Err(TraceError::MissingHeader(block));
        }
        first = false;

        match block {
            BLOCK_HEADER => {
                let magic = input.read_u16()?;
                if magic != MAGIC_NUMBER {
                    return Err(TraceError::BadMagic(magic));
                }
                let version = input.read_u16()?;
                if version != FORMAT_VERSION {
                    return Err(TraceError::IncompatibleVersion {
                        found: version,
                        expected: FORMAT_VERSION,
                    });
                }
            }
            BLOCK_SESSION_INFO => {
                let id = input.read_utf()?;
                let start = input.read_i64()?;
                let dump = input.read_i64()?;
                store.add_session(SessionInfo { id, start, dump });
            }
            BLOCK_EXECUTION_DATA => {
                let id = input.read_i64()? as u64;
                let name = input.read_utf()?;
                let probes = input.read_bool_array()?;
                store.put(ExecutionData { id, name, probes });
            }
            other => return Err(TraceError::UnknownBlock(other)),
        }
    }

    Ok(store)
}

/// Decode an execution-data file.
pub fn read_exec_file(path: &Path) -> Result<ExecutionStore, TraceError> {
    let file = std::fs::File::open(path)?;
    read_exec(BufReader::new(file))
}

struct DataInput<R> {
    inner: R,
}

impl<R: Read> DataInput<R> {
    fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Next block type, or `None` at a clean end of stream.
    fn next_block_type(&mut self) -> Result<Option<u8>, TraceError> {
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TraceError::Io(e)),
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TraceError> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                TraceError::Truncated
            } else {
                TraceError::Io(e)
            }
        })
    }

    fn read_u8(&mut self) -> Result<u8, TraceError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> Result<u16, TraceError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_i64(&mut self) -> Result<i64, TraceError> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    fn read_var_int(&mut self) -> Result<u64, TraceError> {
        let mut value = 0u64;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(TraceError::ProbeArrayTooLarge(value))
    }

    fn read_bool_array(&mut self) -> Result<Vec<bool>, TraceError> {
        let len = self.read_var_int()?;
        if len > MAX_PROBES {
            return Err(TraceError::ProbeArrayTooLarge(len));
        }
        let len = len as usize;
        let mut packed = vec![0u8; len.div_ceil(8)];
        self.read_exact(&mut packed)?;
        Ok((0..len).map(|i| packed[i / 8] & (1 << (i % 8)) != 0).collect())
    }

    fn read_utf(&mut self) -> Result<String, TraceError> {
        let len = self.read_u16()? as usize;
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        decode_modified_utf8(&bytes)
    }
}

/// Decode Java's modified UTF-8 (NUL as two bytes, supplementary characters
/// as surrogate pairs of three bytes each).
pub(crate) fn decode_modified_utf8(bytes: &[u8]) -> Result<String, TraceError> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        if b0 & 0x80 == 0 {
            units.push(u16::from(b0));
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = *bytes.get(i + 1).ok_or(TraceError::InvalidString)?;
            if b1 & 0xC0 != 0x80 {
                return Err(TraceError::InvalidString);
            }
            units.push((u16::from(b0 & 0x1F) << 6) | u16::from(b1 & 0x3F));
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = *bytes.get(i + 1).ok_or(TraceError::InvalidString)?;
            let b2 = *bytes.get(i + 2).ok_or(TraceError::InvalidString)?;
            if b1 & 0xC0 != 0x80 || b2 & 0xC0 != 0x80 {
                return Err(TraceError::InvalidString);
            }
            units.push(
                (u16::from(b0 & 0x0F) << 12) | (u16::from(b1 & 0x3F) << 6) | u16::from(b2 & 0x3F),
            );
            i += 3;
        } else {
            return Err(TraceError::InvalidString);
        }
    }
    String::from_utf16(&units).map_err(|_| TraceError::InvalidString)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        vec![BLOCK_HEADER, 0xC0, 0xC0, 0x10, 0x07]
    }

    fn utf(s: &str) -> Vec<u8> {
        let mut out = (s.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn test_empty_stream_is_empty_store() {
        let store = read_exec(&[][..]).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_header_only() {
        let store = read_exec(&header()[..]).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_reads_session_and_class() {
        let mut bytes = header();
        bytes.push(BLOCK_SESSION_INFO);
        bytes.extend(utf("host-1"));
        bytes.extend(5i64.to_be_bytes());
        bytes.extend(9i64.to_be_bytes());
        bytes.push(BLOCK_EXECUTION_DATA);
        bytes.extend(0x1234i64.to_be_bytes());
        bytes.extend(utf("a/Main"));
        // 10 probes: bits 0 and 9 set
        bytes.extend([10, 0b0000_0001, 0b0000_0010]);

        let store = read_exec(&bytes[..]).unwrap();
        let session = store.sessions().next().unwrap();
        assert_eq!(session.id, "host-1");
        assert_eq!((session.start, session.dump), (5, 9));

        let data = store.get(0x1234, "a/Main").unwrap();
        assert_eq!(data.probes.len(), 10);
        assert!(data.probes[0]);
        assert!(data.probes[9]);
        assert_eq!(data.hit_count(), 2);
    }

    #[test]
    fn test_missing_header_rejected() {
        let bytes = vec![BLOCK_SESSION_INFO, 0, 0];
        assert!(matches!(
            read_exec(&bytes[..]),
            Err(TraceError::MissingHeader(0x10))
        ));
    }

    #[test]
    fn test_text_file_rejected() {
        let err = read_exec(&b"hello world"[..]).unwrap_err();
        assert!(matches!(err, TraceError::MissingHeader(b'h')));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let bytes = vec![BLOCK_HEADER, 0xCA, 0xFE, 0x10, 0x07];
        assert!(matches!(
            read_exec(&bytes[..]),
            Err(TraceError::BadMagic(0xCAFE))
        ));
    }

    #[test]
    fn test_old_version_rejected() {
        let bytes = vec![BLOCK_HEADER, 0xC0, 0xC0, 0x10, 0x06];
        assert!(matches!(
            read_exec(&bytes[..]),
            Err(TraceError::IncompatibleVersion { found: 0x1006, .. })
        ));
    }

    #[test]
    fn test_truncated_block_rejected() {
        let mut bytes = header();
        bytes.push(BLOCK_EXECUTION_DATA);
        bytes.extend([0x00, 0x01]);
        assert!(matches!(read_exec(&bytes[..]), Err(TraceError::Truncated)));
    }

    #[test]
    fn test_unknown_block_rejected() {
        let mut bytes = header();
        bytes.push(0x42);
        assert!(matches!(
            read_exec(&bytes[..]),
            Err(TraceError::UnknownBlock(0x42))
        ));
    }

    #[test]
    fn test_concatenated_dumps_merge() {
        let mut one = header();
        one.push(BLOCK_EXECUTION_DATA);
        one.extend(1i64.to_be_bytes());
        one.extend(utf("a/A"));
        one.extend([2, 0b01]);

        let mut two = header();
        two.push(BLOCK_EXECUTION_DATA);
        two.extend(1i64.to_be_bytes());
        two.extend(utf("a/A"));
        two.extend([2, 0b10]);

        one.extend(two);
        let store = read_exec(&one[..]).unwrap();
        assert_eq!(store.get(1, "a/A").unwrap().probes, vec![true, true]);
    }

    #[test]
    fn test_multibyte_var_int() {
        let mut bytes = header();
        bytes.push(BLOCK_EXECUTION_DATA);
        bytes.extend(3i64.to_be_bytes());
        bytes.extend(utf("a/Big"));
        // 200 probes = 0xC8 -> varint [0xC8, 0x01]
        bytes.extend([0xC8, 0x01]);
        bytes.extend(vec![0xFFu8; 25]);

        let store = read_exec(&bytes[..]).unwrap();
        let data = store.get(3, "a/Big").unwrap();
        assert_eq!(data.probes.len(), 200);
        assert!(data.probes.iter().all(|p| *p));
    }

    #[test]
    fn test_decode_modified_utf8() {
        assert_eq!(decode_modified_utf8(b"a/B$1").unwrap(), "a/B$1");
        assert_eq!(decode_modified_utf8(&[0xC0, 0x80]).unwrap(), "\0");
        assert_eq!(decode_modified_utf8(&[0xC3, 0xA9]).unwrap(), "é");
        // U+1F600 as a CESU-8 surrogate pair
        let smile = [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        assert_eq!(decode_modified_utf8(&smile).unwrap(), "\u{1F600}");
        assert!(decode_modified_utf8(&[0xFF]).is_err());
    }
}
