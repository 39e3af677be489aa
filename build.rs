use std::env;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    if env::var("PROTOC").is_err() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    let out_dir = env::var("OUT_DIR")?;
    let proto_file = "proto/mapreduce.proto";
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .out_dir(&out_dir)
        .compile(&[proto_file], &["proto"])?;
    println!("cargo:rerun-if-changed={proto_file}");
    Ok(())
}
