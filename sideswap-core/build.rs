fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Pass through SIDESWAP_GIT_HASH from packaged build environments
    println!("cargo:rerun-if-env-changed=SIDESWAP_GIT_HASH");
    if let Ok(hash) = std::env::var("SIDESWAP_GIT_HASH") {
        println!("cargo:rustc-env=SIDESWAP_GIT_HASH={}", hash);
    }
}
