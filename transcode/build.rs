fn main() {
    println!("cargo:rustc-check-cfg=cfg(ossl300)");

    if let Ok(version) = std::env::var("DEP_OPENSSL_VERSION_NUMBER") {
        if let Ok(version) = u64::from_str_radix(&version, 16) {
            if version >= 0x3_00_00_00_0 {
                println!("cargo:rustc-cfg=ossl300");
            }
        }
    }
}
