// build.rs

//! Stamps the binary with its release version and cargo profile.
//! `SPINELHUB_RELEASE` overrides the manifest version for tagged builds.

fn main() {
    let manifest_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let version = match std::env::var("SPINELHUB_RELEASE") {
        Ok(release) if !release.trim().is_empty() => release.trim().to_string(),
        _ if manifest_version.is_empty() => "dev".to_string(),
        _ => manifest_version,
    };
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=SPINELHUB_BUILD_VERSION={version}");
    println!("cargo:rustc-env=SPINELHUB_BUILD_PROFILE={profile}");
    println!("cargo:rerun-if-env-changed=SPINELHUB_RELEASE");
}
