//! Compiles the GLSL quad shaders to SPIR-V in `OUT_DIR`.

use std::env;
use std::fs;
use std::path::Path;

use shaderc::{CompileOptions, Compiler, EnvVersion, ShaderKind, SpirvVersion, TargetEnv};

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let out_dir = Path::new(&out_dir);
    let shader_dir = Path::new("shaders");

    println!("cargo:rerun-if-changed=shaders/");

    let compiler = Compiler::new().expect("Failed to create shader compiler");

    compile_shader(
        &compiler,
        &shader_dir.join("quad.vert"),
        &out_dir.join("quad.vert.spv"),
        ShaderKind::Vertex,
    );
    compile_shader(
        &compiler,
        &shader_dir.join("quad.frag"),
        &out_dir.join("quad.frag.spv"),
        ShaderKind::Fragment,
    );
}

fn compile_shader(compiler: &Compiler, input: &Path, output: &Path, kind: ShaderKind) {
    let source = fs::read_to_string(input)
        .unwrap_or_else(|e| panic!("Failed to read shader {}: {e}", input.display()));

    let file_name = input
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("shader");

    let mut options = CompileOptions::new().expect("Failed to create compile options");
    // The device floor is Vulkan 1.1.
    options.set_target_env(TargetEnv::Vulkan, EnvVersion::Vulkan1_1 as u32);
    options.set_target_spirv(SpirvVersion::V1_3);
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let artifact = compiler
        .compile_into_spirv(&source, kind, file_name, "main", Some(&options))
        .unwrap_or_else(|e| panic!("Failed to compile shader {}: {e}", input.display()));

    if artifact.get_num_warnings() > 0 {
        println!(
            "cargo:warning={}: {}",
            input.display(),
            artifact.get_warning_messages()
        );
    }

    fs::write(output, bytemuck::cast_slice::<u32, u8>(artifact.as_binary()))
        .unwrap_or_else(|e| panic!("Failed to write shader {}: {e}", output.display()));
}
