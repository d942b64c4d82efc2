use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn jdeob() -> String {
    std::env::var("CARGO_BIN_EXE_jdeob").unwrap_or_else(|_| {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("jdeob");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    })
}

fn run(args: &[&Path]) -> Output {
    Command::new(jdeob())
        .args(args)
        .env("RUST_LOG", "jdeob=info")
        .output()
        .expect("run jdeob")
}

/// `public class Hello extends java/lang/Object` without members.
fn empty_class_bytes(name: &str) -> Vec<u8> {
    let mut bytes = vec![0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x32];
    bytes.extend_from_slice(&5u16.to_be_bytes());
    bytes.push(7);
    bytes.extend_from_slice(&2u16.to_be_bytes());
    bytes.push(1);
    bytes.extend_from_slice(&(name.len() as u16).to_be_bytes());
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(7);
    bytes.extend_from_slice(&4u16.to_be_bytes());
    let object = "java/lang/Object";
    bytes.push(1);
    bytes.extend_from_slice(&(object.len() as u16).to_be_bytes());
    bytes.extend_from_slice(object.as_bytes());
    bytes.extend_from_slice(&0x0021u16.to_be_bytes());
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&3u16.to_be_bytes());
    for _ in 0..4 {
        bytes.extend_from_slice(&0u16.to_be_bytes());
    }
    bytes
}

fn write_jar(path: &Path, classes: &[&str]) {
    let file = fs::File::create(path).expect("create jar");
    let mut archive = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for name in classes {
        archive
            .start_file(format!("{name}.class"), options)
            .expect("start entry");
        archive
            .write_all(&empty_class_bytes(name))
            .expect("write entry");
    }
    archive.finish().expect("finish jar");
}

#[test]
fn jdeob_exits_non_zero_on_missing_input() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let output = run(&[
        Path::new("missing.jar"),
        &temp_dir.path().join("out.jar"),
    ]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("input not found"));
}

#[test]
fn jdeob_exits_non_zero_on_directory_input() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let output = run(&[temp_dir.path(), &temp_dir.path().join("out.jar")]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("directory"));
}

#[test]
fn jdeob_rewrites_jar_and_reports_every_pass() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let input = temp_dir.path().join("in.jar");
    let output_jar = temp_dir.path().join("out.jar");
    let report = temp_dir.path().join("report.json");
    write_jar(&input, &["Hello", "World"]);
    fs::write(&output_jar, b"stale").expect("stale output");

    let output = Command::new(jdeob())
        .arg(&input)
        .arg(&output_jar)
        .arg("--report")
        .arg(&report)
        .output()
        .expect("run jdeob");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let mut archive =
        zip::ZipArchive::new(fs::File::open(&output_jar).expect("open output")).expect("read output");
    let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["Hello.class".to_string(), "World.class".to_string()]);
    let mut magic = [0u8; 4];
    archive
        .by_name("Hello.class")
        .expect("entry")
        .read_exact(&mut magic)
        .expect("read entry");
    assert_eq!(magic, [0xca, 0xfe, 0xba, 0xbe]);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).expect("read report")).expect("json");
    assert_eq!(report["class_count"], 2);
    let passes = report["passes"].as_array().expect("passes");
    assert_eq!(passes.len(), 16);
    assert_eq!(passes[0]["id"], "field-owner");
    assert_eq!(passes[15]["id"], "compute-maxs");
}
