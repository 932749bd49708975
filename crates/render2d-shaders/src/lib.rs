//! SPIR-V for the quad pipeline.
//!
//! `shaders/quad.vert` and `shaders/quad.frag` are compiled by the build script
//! and embedded here, so a fresh checkout runs without a separate shader step.

use std::sync::OnceLock;

mod spirv_bytes {
    pub static QUAD_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/quad.vert.spv"));
    pub static QUAD_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/quad.frag.spv"));
}

/// SPIR-V words are little-endian; `include_bytes!` gives no alignment.
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

static QUAD_VERT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static QUAD_FRAG_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

/// Vertex stage: set 0 binding 0 transform block, `vec2` position at location 0.
pub fn quad_vertex_shader() -> &'static [u32] {
    QUAD_VERT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::QUAD_VERT))
}

/// Fragment stage: set 1 binding 0 color block.
pub fn quad_fragment_shader() -> &'static [u32] {
    QUAD_FRAG_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::QUAD_FRAG))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn embedded_modules_are_spirv() {
        for (name, bytes, words) in [
            ("quad.vert", spirv_bytes::QUAD_VERT, quad_vertex_shader()),
            ("quad.frag", spirv_bytes::QUAD_FRAG, quad_fragment_shader()),
        ] {
            assert_eq!(bytes.len() % 4, 0, "{name} is not word aligned");
            assert_eq!(words[0], SPIRV_MAGIC, "{name} has a bad magic number");
            assert_eq!(words.len() * 4, bytes.len());
        }
    }

    #[test]
    fn stages_are_distinct_modules() {
        assert_ne!(quad_vertex_shader(), quad_fragment_shader());
    }
}
