//! Integration tests for `pinmap resolve` and `pinmap version`.

use std::process::Command;

fn pinmap() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pinmap"))
}

fn write_map(dir: &std::path::Path) {
    std::fs::write(
        dir.join("importmap.json"),
        r#"{
  "imports": {
    "react": "https://ga.jspm.io/npm:react@18.2.0/index.js",
    "app/": "./src/"
  },
  "scopes": {
    "https://ga.jspm.io/": {
      "loose-envify": "https://ga.jspm.io/npm:loose-envify@1.4.0/index.js"
    }
  }
}
"#,
    )
    .unwrap();
}

#[test]
fn test_version_prints_name() {
    let output = pinmap().arg("version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("pinmap "), "stdout: {stdout}");
}

#[test]
fn test_resolve_through_map_file() {
    let dir = tempfile::tempdir().unwrap();
    write_map(dir.path());

    let output = pinmap()
        .args(["--cwd", dir.path().to_str().unwrap(), "resolve", "react"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "https://ga.jspm.io/npm:react@18.2.0/index.js"
    );

    let output = pinmap()
        .args(["--cwd", dir.path().to_str().unwrap(), "resolve", "app/main.js"])
        .output()
        .unwrap();
    let expected = url::Url::from_directory_path(dir.path())
        .unwrap()
        .join("src/main.js")
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), expected.as_str());
}

#[test]
fn test_resolve_json_scoped_and_missing() {
    let dir = tempfile::tempdir().unwrap();
    write_map(dir.path());
    let cwd = dir.path().to_str().unwrap();

    let output = pinmap()
        .args([
            "--cwd",
            cwd,
            "--json",
            "resolve",
            "loose-envify",
            "--parent",
            "https://ga.jspm.io/npm:react@18.2.0/index.js",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(
        json["resolved"],
        "https://ga.jspm.io/npm:loose-envify@1.4.0/index.js"
    );

    let output = pinmap()
        .args(["--cwd", cwd, "--json", "resolve", "lit"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(stdout.lines().next().unwrap()).unwrap();
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "MODULE_NOT_FOUND");
}
