fn main() {
    // APP_VERSION: CI can pin RELEASE_VERSION; local debug builds get a
    // -dev suffix so stray binaries are identifiable.
    let base = std::env::var("RELEASE_VERSION")
        .or_else(|_| std::env::var("CARGO_PKG_VERSION"))
        .unwrap_or_default();
    let version = if std::env::var("PROFILE").as_deref() == Ok("debug")
        && std::env::var("RELEASE_VERSION").is_err()
    {
        format!("{base}-dev")
    } else {
        base
    };
    println!("cargo:rustc-env=APP_VERSION={version}");
}
