use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "runner_index_cli_{}_{}_{}",
        std::process::id(),
        nanos,
        name
    ))
}

fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
    use zip::write::FileOptions;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

/// Class file for `this` (internal form) extending `java/lang/Object`.
fn class_bytes(this: &str) -> Vec<u8> {
    let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52, 0, 5];
    for (idx, name) in [(1u16, this), (3u16, "java/lang/Object")] {
        out.push(1);
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(7);
        out.extend_from_slice(&idx.to_be_bytes());
    }
    out.extend_from_slice(&[0, 0x21, 0, 2, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0]);
    out
}

fn run_json(args: &[&str]) -> anyhow::Result<Value> {
    let out = Command::new(env!("CARGO_BIN_EXE_runner-index"))
        .args(args)
        .env("RUNNER_INDEX_LOG", "warn")
        .output()?;
    if !out.status.success() {
        return Err(anyhow::anyhow!(
            "command failed: status={:?}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(serde_json::from_slice(&out.stdout)?)
}

#[test]
fn build_inspect_and_resolve_round_trip() -> anyhow::Result<()> {
    let root = temp_dir("flow");
    let app = root.join("app").join("app.jar");
    let lib = root.join("lib").join("lib.jar");
    write_jar(
        &app,
        &[
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\nImplementation-Title: demo\r\n\r\n"),
            ("org/demo/Main.class", &class_bytes("org/demo/Main")),
            ("META-INF/services/x.Y", b"impl.A"),
        ],
    )?;
    write_jar(&lib, &[("META-INF/services/x.Y", b"impl.B")])?;

    let root_s = root.to_string_lossy().to_string();
    let app_s = app.to_string_lossy().to_string();
    let lib_s = lib.to_string_lossy().to_string();
    let config = root.join("config.json");
    std::fs::write(&config, r#"{ "negative-probes": [] }"#)?;
    let config_s = config.to_string_lossy().to_string();

    let built = run_json(&["build", "--root", &root_s, "--main", "org.demo.Main", &app_s, &lib_s])?;
    let index = root.join("runner-index.dat");
    assert_eq!(built["output"].as_str(), Some(index.to_string_lossy().as_ref()));
    assert_eq!(built["archives"].as_u64(), Some(2));
    let digest = built["sha256"].as_str().unwrap_or_default().to_string();
    assert_eq!(digest.len(), 64);

    let index_s = index.to_string_lossy().to_string();
    let inspected = run_json(&["inspect", &index_s])?;
    assert_eq!(inspected["main_class"].as_str(), Some("org.demo.Main"));
    assert_eq!(inspected["sha256"].as_str(), Some(digest.as_str()));
    assert_eq!(inspected["archives"].as_array().map(Vec::len), Some(2));
    assert_eq!(
        inspected["archives"][0]["manifest"]["implementation_title"].as_str(),
        Some("demo")
    );

    let resolved = run_json(&["--config", &config_s, "resolve", &index_s, "--class", "org.demo.Main"])?;
    assert_eq!(resolved["class"]["name"].as_str(), Some("org.demo.Main"));
    assert_eq!(resolved["class"]["origin"]["kind"].as_str(), Some("archive"));
    assert_eq!(resolved["class"]["origin"]["index"].as_u64(), Some(0));

    let main = run_json(&["--config", &config_s, "resolve", &index_s])?;
    assert_eq!(main["class"]["name"].as_str(), Some("org.demo.Main"));
    assert_eq!(main["class"]["origin"]["kind"].as_str(), Some("archive"));

    let services = run_json(&[
        "--config",
        &config_s,
        "resolve",
        &index_s,
        "--resource",
        "META-INF/services/x.Y",
    ])?;
    assert_eq!(services["urls"].as_array().map(Vec::len), Some(2));
    assert_eq!(services["first"], services["urls"][0]);
    assert!(
        services["first"]
            .as_str()
            .is_some_and(|url| url.ends_with("app.jar!/META-INF/services/x.Y"))
    );

    let aot = run_json(&["build-aot", "--root", &root_s, "--main", "org.demo.Main", &app_s, &lib_s])?;
    assert!(root.join("runner-index-aot.dat").is_file());
    assert_eq!(aot["main_class"].as_str(), Some("org.demo.Main"));

    std::fs::remove_dir_all(root)?;
    Ok(())
}
