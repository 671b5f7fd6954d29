use std::path::PathBuf;

fn main() {
    let schema = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../capnp/head.capnp");
    println!("cargo:rerun-if-changed={}", schema.display());
    capnpc::CompilerCommand::new()
        .src_prefix("../../")
        .file(schema)
        .run()
        .expect("capnp compile");
}
