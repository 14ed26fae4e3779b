fn main() {
    // cfg.tomlが存在しない場合はデフォルト値でビルドされる
    if !std::path::Path::new("cfg.toml").exists() {
        println!("cargo:warning=cfg.toml not found, using built-in defaults (see cfg.toml.example)");
    }
    println!("cargo:rerun-if-changed=cfg.toml");

    #[cfg(feature = "embuild")]
    embuild::espidf::sysenv::output();
}
