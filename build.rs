use std::env;
use std::fs::File;
use std::io::Write;
use std::path::Path;

//EPOCHMAP_SCAN_THRESHOLD

fn main() {
    println!("cargo:rerun-if-env-changed=EPOCHMAP_SCAN_THRESHOLD");

    let out_dir = env::var("OUT_DIR").expect("no out directory");
    let dest = Path::new(&out_dir).join("build_constants.rs");

    let mut file = File::create(&dest).expect("could not create file");

    let scan: u32 = option_env!("EPOCHMAP_SCAN_THRESHOLD")
        .map_or(Ok(128), str::parse)
        .expect("failed to parse env variable EPOCHMAP_SCAN_THRESHOLD");

    if scan == 0 {
        panic!("invalid EPOCHMAP_SCAN_THRESHOLD value (0)");
    }

    write!(&mut file, "const DEFAULT_SCAN_THRESHOLD: u32 = {};", scan)
        .expect("could not write to file");
}
