use std::io::Result;

fn main() -> Result<()> {
    tonic_build::configure().compile_protos(&["proto/aggregator.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/aggregator.proto");
    Ok(())
}
