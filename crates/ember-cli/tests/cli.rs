use assert_cmd::Command;
use predicates::prelude::*;

fn ember() -> Command {
    Command::cargo_bin("ember").unwrap()
}

#[test]
fn test_cli_help() {
    ember()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_cli_version() {
    ember().arg("--version").assert().success();
}

// Test argument parsing failure
#[test]
fn test_invalid_command() {
    ember().arg("not-a-command").assert().failure();
}

#[test]
fn test_generate_help_lists_flags() {
    ember()
        .args(["generate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--repo-id-or-model-path"))
        .stdout(predicate::str::contains("--thread-num"))
        .stdout(predicate::str::contains("--max-new-tokens"));
}

#[test]
fn test_cache_list_empty() {
    let dir = tempfile::tempdir().unwrap();
    ember()
        .current_dir(dir.path())
        .args(["cache", "list", "--cache-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No cached models"));
}

#[test]
fn test_cache_purge_nothing() {
    let dir = tempfile::tempdir().unwrap();
    ember()
        .current_dir(dir.path())
        .args(["cache", "purge", "org/demo-model", "--cache-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing cached"));
}

#[test]
fn test_generate_missing_local_model() {
    let dir = tempfile::tempdir().unwrap();
    ember()
        .current_dir(dir.path())
        .args([
            "generate",
            "--repo-id-or-model-path",
            "/nonexistent/path",
            "--cache-dir",
        ])
        .arg(dir.path())
        .env("HF_ENDPOINT", "http://127.0.0.1:9")
        .assert()
        .failure();
}

#[test]
fn test_generate_fails_without_external_tokenizer() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("ckpt");
    std::fs::create_dir(&checkpoint).unwrap();
    std::fs::write(checkpoint.join("config.json"), r#"{"model_type": "gpt_neox"}"#).unwrap();

    ember()
        .current_dir(dir.path())
        .args(["generate", "--repo-id-or-model-path"])
        .arg(&checkpoint)
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("Output:").not())
        .stderr(predicate::str::contains("tokenizer.json"));
}

#[test]
fn test_config_file_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("ember.toml");
    std::fs::write(&config, "[model]\nprecision = \"int3\"\n").unwrap();

    ember()
        .current_dir(dir.path())
        .args(["cache", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ember.toml"));
}

#[cfg(unix)]
#[test]
fn test_convert_with_command() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("ckpt");
    std::fs::create_dir(&checkpoint).unwrap();
    std::fs::write(checkpoint.join("config.json"), r#"{"model_type": "gpt_neox"}"#).unwrap();
    std::fs::write(
        dir.path().join("ember.toml"),
        "[convert]\nprogram = \"sh\"\nargs = [\"-c\", \"printf converted > {outfile}\"]\n",
    )
    .unwrap();

    ember()
        .current_dir(dir.path())
        .args(["convert", "--input", "ckpt", "--output", "out", "--precision", "int8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ggml-gptneox-int8.gguf"));

    let artifact = dir.path().join("out").join("ggml-gptneox-int8.gguf");
    assert_eq!(std::fs::read_to_string(artifact).unwrap(), "converted");
}
