//! Dump / undump of compiled functions
//!
//! A dump is a JSON document holding a small header and the serialized
//! prototype tree. Source refs are not part of the format, so undumped
//! functions run without debugger metadata.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use super::error::{DumpError, DumpResult};
use super::value::FunctionProto;

/// Header magic of every dump
pub const DUMP_MAGIC: &str = "moonlet-bytecode";

/// Current format version
pub const DUMP_VERSION: u32 = 1;

#[derive(Serialize)]
struct DumpOut<'a> {
    magic: &'a str,
    version: u32,
    function: &'a FunctionProto,
}

#[derive(Deserialize)]
struct DumpIn {
    magic: String,
    version: u32,
    function: serde_json::Value,
}

fn write_error(err: serde_json::Error) -> DumpError {
    if err.is_io() {
        DumpError::Io(err.into())
    } else {
        DumpError::Format(err)
    }
}

/// Write a prototype to `writer`
///
/// Only self-contained functions can be dumped: a prototype that captures
/// upvalues is rejected.
pub fn dump<W: Write>(proto: &FunctionProto, mut writer: W) -> DumpResult<()> {
    if !proto.upvalues.is_empty() {
        return Err(DumpError::HasUpvalues {
            name: proto.name.clone(),
            count: proto.upvalues.len(),
        });
    }
    let out = DumpOut {
        magic: DUMP_MAGIC,
        version: DUMP_VERSION,
        function: proto,
    };
    serde_json::to_writer(&mut writer, &out).map_err(write_error)?;
    writer.flush()?;
    Ok(())
}

/// Read a prototype previously written by [`dump`]
pub fn undump<R: Read>(reader: R) -> DumpResult<FunctionProto> {
    let raw: DumpIn = serde_json::from_reader(reader)?;
    if raw.magic != DUMP_MAGIC {
        return Err(DumpError::BadMagic { found: raw.magic });
    }
    if raw.version != DUMP_VERSION {
        return Err(DumpError::UnsupportedVersion {
            found: raw.version,
            expected: DUMP_VERSION,
        });
    }
    let mut proto: FunctionProto = serde_json::from_value(raw.function)?;
    proto.strip_source_refs();
    Ok(proto)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Compiler, SourceCode, UpvalueDesc};
    use crate::parser::Parser;

    fn compiled(source: &str) -> FunctionProto {
        let block = Parser::parse_chunk(source).unwrap();
        let code = SourceCode::new(0, "dump", source);
        let compiled = Compiler::new(&code).compile_chunk(&block).unwrap();
        (*compiled.proto).clone()
    }

    #[test]
    fn dump_preserves_code_and_drops_refs() {
        let proto = compiled("local t = {1, 2}\nreturn #t + 1");
        let mut bytes = Vec::new();
        dump(&proto, &mut bytes).unwrap();

        let back = undump(bytes.as_slice()).unwrap();
        assert_eq!(back.chunk.len(), proto.chunk.len());
        assert_eq!(back.chunk.constants(), proto.chunk.constants());
        assert!(back.chunk.code().iter().all(|i| i.source_ref.is_none()));
    }

    #[test]
    fn functions_with_upvalues_are_rejected() {
        let mut proto = compiled("return 1");
        proto.upvalues.push(UpvalueDesc::Local(0));
        let err = dump(&proto, Vec::new()).unwrap_err();
        assert!(matches!(err, DumpError::HasUpvalues { count: 1, .. }));
    }

    struct ClosedSink;

    impl Write for ClosedSink {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unwritable_target_is_io_error() {
        let proto = compiled("return 1");
        let err = dump(&proto, ClosedSink).unwrap_err();
        assert!(matches!(err, DumpError::Io(_)));
    }

    #[test]
    fn header_is_checked() {
        let err = undump(br#"{"magic":"x","version":1,"function":{}}"#.as_slice()).unwrap_err();
        assert!(matches!(err, DumpError::BadMagic { .. }));
        let text = format!(r#"{{"magic":"{DUMP_MAGIC}","version":9,"function":{{}}}}"#);
        let err = undump(text.as_bytes()).unwrap_err();
        assert!(matches!(err, DumpError::UnsupportedVersion { found: 9, .. }));
    }
}
