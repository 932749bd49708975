//! SPIR-V loading.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use crate::error::{GpuError, Result};

/// Load a compiled SPIR-V module from disk.
pub fn load_spirv(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .map_err(|e| GpuError::ShaderLoad(format!("{}: {e}", path.display())))?;

    let code = read_spirv(&mut file)
        .map_err(|e| GpuError::ShaderLoad(format!("{}: {e}", path.display())))?;

    tracing::debug!("Loaded shader {} ({} words)", path.display(), code.len());
    Ok(code)
}

/// Decode SPIR-V from an in-memory byte slice.
pub fn spirv_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    read_spirv(&mut Cursor::new(bytes)).map_err(|e| GpuError::ShaderLoad(e.to_string()))
}

fn read_spirv<R: Read + Seek>(reader: &mut R) -> std::io::Result<Vec<u32>> {
    ash::util::read_spv(reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_words() {
        let magic = 0x0723_0203_u32.to_le_bytes();
        let mut bytes = magic.to_vec();
        bytes.extend_from_slice(&0x0001_0000_u32.to_le_bytes());

        let words = spirv_from_bytes(&bytes).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(spirv_from_bytes(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn missing_file_is_a_shader_error() {
        let err = load_spirv("definitely/not/here.spv").unwrap_err();
        assert!(matches!(err, GpuError::ShaderLoad(_)));
    }
}
