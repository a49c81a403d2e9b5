/*
Purpose: Link the Node binding against libscriptpool.
Exports: None (build script only).
Role: Resolve libscriptpool search path for the N-API addon.
Invariants: Uses SCRIPTPOOL_LIB_DIR or repo-local target/ outputs.
Notes: Fails fast when libscriptpool cannot be located.
*/

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=SCRIPTPOOL_LIB_DIR");

    let crate_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let repo_root = crate_dir
        .ancestors()
        .nth(3)
        .expect("bindings/node/native should be three levels below repo root")
        .to_path_buf();

    let lib_dir = env::var("SCRIPTPOOL_LIB_DIR")
        .ok()
        .map(PathBuf::from)
        .into_iter()
        .chain([
            repo_root.join("target").join("debug"),
            repo_root.join("target").join("release"),
        ])
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| {
            panic!("libscriptpool not found; set SCRIPTPOOL_LIB_DIR or build target/debug/libscriptpool.*")
        });

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=scriptpool");
}
