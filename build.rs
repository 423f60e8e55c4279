fn main() {
    feature_conflicts();

    let version = get_version();
    println!("cargo:rustc-env=VERSION={version}");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=Cargo.toml");
}

fn feature_conflicts() {
    let tls_rustls = std::env::var("CARGO_FEATURE_TLS_RUSTLS").is_ok();
    let tls_native = std::env::var("CARGO_FEATURE_TLS_NATIVE").is_ok();

    if tls_rustls && tls_native {
        panic!(
            "Cannot enable both 'tls-rustls' and 'tls-native' features simultaneously. Choose one."
        );
    }

    // Both providers are HTTPS only.
    if !tls_rustls && !tls_native {
        panic!("OpenAI and Twilio require a TLS backend. Enable either 'tls-rustls' or 'tls-native' feature");
    }

    if std::env::var("CARGO_FEATURE_DB_SQLITE").is_err() {
        panic!("At least one database backend feature must be enabled!");
    }
}

/// Package version with the enabled TLS backend in the build metadata suffix.
fn get_version() -> String {
    let suffixes: Vec<&str> = [("TLS_NATIVE", "tn"), ("TLS_RUSTLS", "tr")]
        .into_iter()
        .filter(|(feature, _)| std::env::var(format!("CARGO_FEATURE_{feature}")).is_ok())
        .map(|(_, name)| name)
        .collect();

    let version = env!("CARGO_PKG_VERSION");
    if suffixes.is_empty() {
        version.to_string()
    } else {
        format!("{}+{}", version, suffixes.join(""))
    }
}
