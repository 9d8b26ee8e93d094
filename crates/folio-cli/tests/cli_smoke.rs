use serde_json::Value;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    fn new(prefix: &str) -> Self {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "folio-cli-{prefix}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("temp dir should be created");
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn run_folio<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = env!("CARGO_BIN_EXE_folio");
    Command::new(bin)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("folio command should execute")
}

fn describe(output: &Output) -> String {
    format!(
        "status {:?}\nstdout:\n{}\nstderr:\n{}",
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    )
}

fn assert_exit(output: &Output, code: i32) {
    assert_eq!(output.status.code(), Some(code), "{}", describe(output));
}

fn parse_json_stdout(output: &Output) -> Value {
    serde_json::from_slice::<Value>(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "expected valid JSON stdout, got error: {e}\nstdout:\n{}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn wrap(body: &str) -> String {
    format!("<div class=\"page-container\"><main class=\"page-content\">{body}</main></div>\n")
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir should be created");
    }
    fs::write(path, content).expect("fixture should be written");
}

/// Two-page unit: an opening page and a closing page. `closing_body`
/// replaces the generated text of page 2.
fn write_workspace(root: &Path, closing_body: &str) {
    write(
        &root.join("reference/page-0001.txt"),
        "Chapter 1 Foundations\nOverview\nTerms\nThe quick brown fox jumps\n1\n",
    );
    write(
        &root.join("reference/page-0002.txt"),
        "over the lazy dog again and again and once more\nKey points\nfoxes are quick\n2\n",
    );
    write(
        &root.join("generated/page-0001.html"),
        &wrap(
            "<h1>Chapter 1 Foundations</h1>\
             <ul class=\"section-navigation\"><li>Overview</li><li>Terms</li></ul>\
             <p>The quick brown fox jumps</p>",
        ),
    );
    write(&root.join("generated/page-0002.html"), &wrap(closing_body));
    write(
        &root.join("judgment.json"),
        r#"{"score": 91.0, "rationale": "layout matches"}"#,
    );
}

const CLEAN_CLOSING: &str =
    "<p>over the lazy dog again and again and once more</p><h2>Key points</h2><p>foxes are quick</p>";
const SHORT_CLOSING: &str =
    "<p>over the lazy dog again and again and once</p><h2>Key points</h2><p>foxes are quick</p>";

fn run_unit(root: &Path) -> Output {
    run_folio([
        OsStr::new("run"),
        OsStr::new("--workspace"),
        root.as_os_str(),
        OsStr::new("--unit"),
        OsStr::new("ch01"),
        OsStr::new("--unit-number"),
        OsStr::new("1"),
        OsStr::new("--pages"),
        OsStr::new("1-2"),
        OsStr::new("--json"),
    ])
}

#[test]
fn init_config_writes_defaults_once() {
    let tmp = TempDirGuard::new("init-config");
    let path = tmp.path().join("conf/folio.toml");

    let output = run_folio([OsStr::new("init-config"), path.as_os_str(), OsStr::new("--json")]);
    assert_exit(&output, 0);
    let payload = parse_json_stdout(&output);
    assert!(payload["bytes"].as_u64().expect("bytes") > 0);
    let written = fs::read_to_string(&path).expect("config written");
    assert!(written.contains("[retry]"));
    assert!(written.contains("max_attempts = 3"));

    let again = run_folio([OsStr::new("init-config"), path.as_os_str()]);
    assert_exit(&again, 2);

    let forced = run_folio([
        OsStr::new("init-config"),
        path.as_os_str(),
        OsStr::new("--force"),
        OsStr::new("--config"),
        path.as_os_str(),
    ]);
    assert_exit(&forced, 0);
}

#[test]
fn coverage_exit_code_follows_verdict() {
    let tmp = TempDirGuard::new("coverage");
    let reference = tmp.path().join("ref.txt");
    let exact = tmp.path().join("exact.html");
    let short = tmp.path().join("short.html");
    write(&reference, "one two three four five six seven eight nine ten\n");
    write(&exact, &wrap("<p>one two three four five six seven eight nine ten</p>"));
    write(&short, &wrap("<p>one two three four five six seven eight nine</p>"));

    let output = run_folio([
        OsStr::new("coverage"),
        OsStr::new("--reference"),
        reference.as_os_str(),
        OsStr::new("--generated"),
        exact.as_os_str(),
        OsStr::new("--json"),
    ]);
    assert_exit(&output, 0);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["verdict"], "pass");
    assert_eq!(payload["ratio"], 100.0);

    let output = run_folio([
        OsStr::new("coverage"),
        OsStr::new("--reference"),
        reference.as_os_str(),
        OsStr::new("--generated"),
        short.as_os_str(),
        OsStr::new("--json"),
    ]);
    assert_exit(&output, 1);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["band"], "major");
    assert_eq!(payload["missing"]["ten"], 1);
}

#[test]
fn structure_flags_unbalanced_markup() {
    let tmp = TempDirGuard::new("structure");
    let artifact = tmp.path().join("page.html");
    write(
        &artifact,
        "<div class=\"page-container\"><main class=\"page-content\"><div><p>text</p></main></div>",
    );

    let output = run_folio([OsStr::new("structure"), artifact.as_os_str(), OsStr::new("--json")]);
    assert_exit(&output, 2);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["status"], "fail");
    assert!(
        payload["errors"]
            .as_array()
            .expect("errors")
            .iter()
            .any(|e| e["code"] == "unbalanced_nesting")
    );
}

#[test]
fn boundary_detects_leaked_opening() {
    let tmp = TempDirGuard::new("boundary");
    let artifact = tmp.path().join("last.html");
    write(
        &artifact,
        &wrap("<h2>Key points</h2><p>done</p><h1>Chapter 4 Next</h1>"),
    );

    let output = run_folio([
        OsStr::new("boundary"),
        artifact.as_os_str(),
        OsStr::new("--position"),
        OsStr::new("last"),
        OsStr::new("--unit-number"),
        OsStr::new("3"),
        OsStr::new("--json"),
    ]);
    assert_exit(&output, 2);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["closingFound"], true);
    assert_eq!(payload["leak"]["number"], 4);
}

#[test]
fn run_releases_a_clean_unit() {
    let tmp = TempDirGuard::new("run-clean");
    write_workspace(tmp.path(), CLEAN_CLOSING);

    let output = run_unit(tmp.path());
    assert_exit(&output, 0);
    let report = parse_json_stdout(&output);
    assert_eq!(report["state"], "released");
    assert_eq!(report["exit"], "released");
    assert_eq!(report["gateResults"].as_array().expect("gates").len(), 6);
    assert!(tmp.path().join(".folio/ledger/ch01/unit.jsonl").exists());

    let history = run_folio([
        OsStr::new("history"),
        OsStr::new("--workspace"),
        tmp.path().as_os_str(),
        OsStr::new("--unit"),
        OsStr::new("ch01"),
        OsStr::new("--json"),
    ]);
    assert_exit(&history, 0);
    let history = parse_json_stdout(&history);
    assert_eq!(history["unit"]["state"], "released");
    assert_eq!(history["unit"]["orderedPages"].as_array().expect("pages").len(), 2);
}

#[test]
fn run_waits_for_confirmation_then_releases() {
    let tmp = TempDirGuard::new("run-confirm");
    write_workspace(tmp.path(), SHORT_CLOSING);

    let output = run_unit(tmp.path());
    assert_exit(&output, 1);
    let report = parse_json_stdout(&output);
    assert_eq!(report["state"], "awaiting_confirmation");
    assert_eq!(report["diagnostics"]["awaitingConfirmation"][0]["target"]["page"], 2);

    let confirm = run_folio([
        OsStr::new("confirm"),
        OsStr::new("--workspace"),
        tmp.path().as_os_str(),
        OsStr::new("--unit"),
        OsStr::new("ch01"),
        OsStr::new("--page"),
        OsStr::new("2"),
        OsStr::new("--operator"),
        OsStr::new("dana"),
        OsStr::new("--json"),
    ]);
    assert_exit(&confirm, 0);
    assert_eq!(parse_json_stdout(&confirm)["actor"], "dana");

    let output = run_unit(tmp.path());
    assert_exit(&output, 0);
    let report = parse_json_stdout(&output);
    assert_eq!(report["state"], "released");
    assert_eq!(report["pages"][1]["confirmedBy"], "dana");
}

#[test]
fn confirm_rejects_reserved_operator() {
    let tmp = TempDirGuard::new("confirm-reserved");
    write_workspace(tmp.path(), SHORT_CLOSING);
    assert_exit(&run_unit(tmp.path()), 1);

    let output = run_folio([
        OsStr::new("confirm"),
        OsStr::new("--workspace"),
        tmp.path().as_os_str(),
        OsStr::new("--unit"),
        OsStr::new("ch01"),
        OsStr::new("--page"),
        OsStr::new("2"),
        OsStr::new("--operator"),
        OsStr::new("policy"),
    ]);
    assert_exit(&output, 2);
    assert!(String::from_utf8_lossy(&output.stderr).contains("reserved"));
}
