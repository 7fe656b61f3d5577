//! Behaviour tests for the `gpe` CLI.

mod support;

use assert_cmd::Command;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;
use std::path::PathBuf;
use std::process::Output;
use support::{cifar_records, ensemble_toml, mnist_idx, save_resnet18};
use tempfile::TempDir;

#[derive(Default)]
struct CliContext {
    dir: RefCell<Option<TempDir>>,
    config: RefCell<Option<PathBuf>>,
    output: RefCell<Option<Output>>,
}

impl CliContext {
    fn workspace(&self, toml: impl FnOnce(&std::path::Path) -> String) {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let (parameters, _) = save_resnet18(dir.path(), "resnet18.mpk", 10);
        let config = dir.path().join("ensemble.toml");
        std::fs::write(&config, toml(&parameters)).unwrap_or_else(|e| panic!("write config: {e}"));
        self.config.replace(Some(config));
        self.dir.replace(Some(dir));
    }

    fn config_arg(&self) -> String {
        self.config
            .borrow()
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| panic!("config to be written"))
    }

    #[expect(clippy::expect_used, reason = "tests should fail loudly")]
    fn run(&self, args: &[&str]) {
        let output = Command::cargo_bin("gpe")
            .unwrap_or_else(|e| panic!("failed to locate gpe binary: {e}"))
            .env_remove("RUST_LOG")
            .args(args)
            .output()
            .expect("failed to run gpe");
        self.output.replace(Some(output));
    }

    fn file(&self, name: &str, bytes: &[u8]) -> String {
        let path = self
            .dir
            .borrow()
            .as_ref()
            .map(|dir| dir.path().join(name))
            .unwrap_or_else(|| panic!("workspace to exist"));
        std::fs::write(&path, bytes).unwrap_or_else(|e| panic!("write {name}: {e}"));
        path.display().to_string()
    }

    fn stdout(&self) -> String {
        self.output
            .borrow()
            .as_ref()
            .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
            .unwrap_or_else(|| panic!("missing output"))
    }
}

#[fixture]
fn cli_context() -> CliContext {
    CliContext::default()
}

#[given("the gpe binary")]
fn given_binary(#[from(cli_context)] ctx: &CliContext) {
    let _ = ctx;
}

#[given("a saved single-member ensemble")]
fn given_single_member(#[from(cli_context)] ctx: &CliContext) {
    ctx.workspace(|parameters| ensemble_toml(0, 0, 1, "simple_avg", parameters));
}

#[given("an ensemble config with fewer members than levels")]
fn given_member_mismatch(#[from(cli_context)] ctx: &CliContext) {
    ctx.workspace(|parameters| ensemble_toml(1, 1, 2, "simple_avg", parameters));
}

#[when("running a dry run")]
fn when_dry_run(#[from(cli_context)] ctx: &CliContext) {
    let config = ctx.config_arg();
    ctx.run(&["--dry-run=true", "--ensemble", &config]);
}

#[when("running with \"{args}\"")]
#[expect(
    clippy::needless_pass_by_value,
    reason = "BDD macro injects owned value"
)]
fn when_running(args: String, #[from(cli_context)] ctx: &CliContext) {
    let args: Vec<&str> = args.split_whitespace().collect();
    ctx.run(&args);
}

fn digit_labels(images: usize) -> Vec<u8> {
    (0..images)
        .map(|i| u8::try_from(i % 10).unwrap_or_else(|e| panic!("{e}")))
        .collect()
}

#[when("evaluating a {images:usize} image dataset in batches of {batch:usize}")]
fn when_evaluating(images: usize, batch: usize, #[from(cli_context)] ctx: &CliContext) {
    let dataset = ctx.file("test_batch.bin", &cifar_records(&digit_labels(images)));
    let config = ctx.config_arg();
    let batch = batch.to_string();
    ctx.run(&["--ensemble", &config, "--dataset", &dataset, "--batch-size", &batch]);
}

#[when("evaluating a {images:usize} image MNIST dataset")]
fn when_evaluating_mnist(images: usize, #[from(cli_context)] ctx: &CliContext) {
    let (pixels, labels) = mnist_idx(&digit_labels(images));
    let dataset = ctx.file("t10k-images-idx3-ubyte", &pixels);
    let labels = ctx.file("t10k-labels-idx1-ubyte", &labels);
    let config = ctx.config_arg();
    ctx.run(&[
        "--ensemble",
        &config,
        "--dataset",
        &dataset,
        "--dataset-format",
        "mnist",
        "--labels",
        &labels,
    ]);
}

#[when("evaluating an MNIST dataset without labels")]
fn when_evaluating_mnist_unlabelled(#[from(cli_context)] ctx: &CliContext) {
    let (pixels, _) = mnist_idx(&[0]);
    let dataset = ctx.file("t10k-images-idx3-ubyte", &pixels);
    let config = ctx.config_arg();
    ctx.run(&["--ensemble", &config, "--dataset", &dataset, "--dataset-format", "mnist"]);
}

#[then("it exits successfully")]
#[expect(clippy::expect_used, reason = "tests should fail loudly")]
fn then_success(#[from(cli_context)] ctx: &CliContext) {
    let binding = ctx.output.borrow();
    let output = binding.as_ref().expect("missing output");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[then("it exits with an error")]
#[expect(clippy::expect_used, reason = "tests should fail loudly")]
fn then_error(#[from(cli_context)] ctx: &CliContext) {
    let status = ctx.output.borrow().as_ref().expect("missing output").status;
    assert!(!status.success());
}

#[then("stdout is empty")]
fn then_stdout_empty(#[from(cli_context)] ctx: &CliContext) {
    assert!(ctx.stdout().trim().is_empty());
}

#[then("the report covers {samples:u64} samples")]
fn then_report_samples(samples: u64, #[from(cli_context)] ctx: &CliContext) {
    let report: serde_json::Value = serde_json::from_str(&ctx.stdout())
        .unwrap_or_else(|e| panic!("report json: {e}"));
    assert_eq!(report.get("samples").and_then(serde_json::Value::as_u64), Some(samples));
    assert_eq!(report.get("attack").and_then(serde_json::Value::as_str), Some("baseline"));
    assert_eq!(
        report.get("clean_correct"),
        report.get("adversarial_correct")
    );
}

#[scenario(path = "tests/features/gpe_cli.feature", index = 0)]
fn dry_run(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/gpe_cli.feature", index = 1)]
fn invalid_flag(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/gpe_cli.feature", index = 2)]
fn missing_ensemble(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/gpe_cli.feature", index = 3)]
fn member_count_mismatch(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/gpe_cli.feature", index = 4)]
fn evaluating_a_dataset(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/gpe_cli.feature", index = 5)]
fn evaluating_mnist(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/gpe_cli.feature", index = 6)]
fn mnist_without_labels(cli_context: CliContext) {
    let _ = cli_context;
}
