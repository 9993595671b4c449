//! Execution-data encoding.

use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::{
    ExecutionStore, BLOCK_EXECUTION_DATA, BLOCK_HEADER, BLOCK_SESSION_INFO, FORMAT_VERSION,
    MAGIC_NUMBER,
};

/// Encode a store: header, then sessions, then class data, each in sorted
/// order so the same store always produces the same bytes.
pub fn write_exec<W: Write>(store: &ExecutionStore, out: &mut W) -> io::Result<()> {
    out.write_all(&[BLOCK_HEADER])?;
    out.write_all(&MAGIC_NUMBER.to_be_bytes())?;
    out.write_all(&FORMAT_VERSION.to_be_bytes())?;

    for session in store.sessions() {
        out.write_all(&[BLOCK_SESSION_INFO])?;
        write_utf(out, &session.id)?;
        out.write_all(&session.start.to_be_bytes())?;
        out.write_all(&session.dump.to_be_bytes())?;
    }

    for data in store.entries() {
        out.write_all(&[BLOCK_EXECUTION_DATA])?;
        out.write_all(&(data.id as i64).to_be_bytes())?;
        write_utf(out, &data.name)?;
        write_bool_array(out, &data.probes)?;
    }

    Ok(())
}

/// Write a store to `path`, replacing any existing file.
pub fn write_exec_file(store: &ExecutionStore, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(std::fs::File::create(path)?);
    write_exec(store, &mut out)?;
    out.flush()
}

fn write_var_int<W: Write>(out: &mut W, mut value: u32) -> io::Result<()> {
    while value & !0x7F != 0 {
        out.write_all(&[0x80 | (value & 0x7F) as u8])?;
        value >>= 7;
    }
    out.write_all(&[value as u8])
}

fn write_bool_array<W: Write>(out: &mut W, values: &[bool]) -> io::Result<()> {
    let len = u32::try_from(values.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "probe array too large"))?;
    write_var_int(out, len)?;
    for chunk in values.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, hit)| if *hit { acc | (1 << i) } else { acc });
        out.write_all(&[byte])?;
    }
    Ok(())
}

fn write_utf<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    let mut encoded = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => encoded.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                encoded.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                encoded.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                encoded.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                encoded.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                encoded.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    let len = u16::try_from(encoded.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string too long"))?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::reader::decode_modified_utf8;
    use crate::exec::{read_exec, ExecutionData, SessionInfo};

    #[test]
    fn test_empty_store_writes_header_only() {
        let mut out = Vec::new();
        write_exec(&ExecutionStore::new(), &mut out).unwrap();
        assert_eq!(out, vec![0x01, 0xC0, 0xC0, 0x10, 0x07]);
    }

    #[test]
    fn test_var_int_encoding() {
        let mut out = Vec::new();
        write_var_int(&mut out, 200).unwrap();
        assert_eq!(out, vec![0xC8, 0x01]);

        let mut out = Vec::new();
        write_var_int(&mut out, 5).unwrap();
        assert_eq!(out, vec![0x05]);
    }

    #[test]
    fn test_utf_encoding_matches_decoder() {
        for s in ["a/Main$1", "caf\u{e9}", "nul\0", "\u{1F600}"] {
            let mut out = Vec::new();
            write_utf(&mut out, s).unwrap();
            let len = u16::from_be_bytes([out[0], out[1]]) as usize;
            assert_eq!(len, out.len() - 2);
            assert_eq!(decode_modified_utf8(&out[2..]).unwrap(), s);
        }
    }

    #[test]
    fn test_written_bytes_read_back() {
        let mut store = ExecutionStore::new();
        store.add_session(SessionInfo {
            id: "device-1".to_string(),
            start: 100,
            dump: 200,
        });
        store.put(ExecutionData::new(
            0xFEDC_BA98_7654_3210,
            "com/example/Camera",
            vec![true, false, true, false, false, false, false, false, true],
        ));

        let mut bytes = Vec::new();
        write_exec(&store, &mut bytes).unwrap();
        assert_eq!(read_exec(&bytes[..]).unwrap(), store);
    }
}
