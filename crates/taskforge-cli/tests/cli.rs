//! CLI smoke tests for the offline subcommands.

use assert_cmd::Command;
use predicates::prelude::*;

const SAMPLE_DIFF: &str = "\
diff --git a/src/scheme.py b/src/scheme.py
--- a/src/scheme.py
+++ b/src/scheme.py
@@ -1 +1 @@
-old
+new
diff --git a/tests/test_scheme.py b/tests/test_scheme.py
new file mode 100644
--- /dev/null
+++ b/tests/test_scheme.py
@@ -0,0 +1 @@
+assert True
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1 +1 @@
-a
+b
";

#[test]
fn screen_accepts_test_runner_script() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = temp.path().join("oracle.sh");
    std::fs::write(&script, "#!/bin/bash\npytest tests/ -x\n").expect("write");

    Command::cargo_bin("taskforge")
        .expect("binary")
        .args(["screen", "--script"])
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("accepted"));
}

#[test]
fn screen_rejects_grep_only_script() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = temp.path().join("oracle.sh");
    std::fs::write(&script, "#!/bin/bash\ngrep -q fixed src/scheme.py\n").expect("write");

    Command::cargo_bin("taskforge")
        .expect("binary")
        .args(["screen", "--script"])
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("screening rejected"));
}

#[test]
fn split_classifies_and_writes_patches() {
    let temp = tempfile::tempdir().expect("tempdir");
    let diff = temp.path().join("change.diff");
    std::fs::write(&diff, SAMPLE_DIFF).expect("write");
    let out = temp.path().join("patches");

    Command::cargo_bin("taskforge")
        .expect("binary")
        .args(["split", "--diff"])
        .arg(&diff)
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("tests/test_scheme.py")
                .and(predicate::str::contains("src/scheme.py"))
                .and(predicate::str::contains("README.md")),
        );

    let test_patch = std::fs::read_to_string(out.join("test.patch")).expect("test patch");
    assert!(test_patch.contains("tests/test_scheme.py"));
    assert!(!test_patch.contains("src/scheme.py"));
    let fix_patch = std::fs::read_to_string(out.join("fix.patch")).expect("fix patch");
    assert!(fix_patch.contains("src/scheme.py"));
}

#[test]
fn split_rejects_diff_without_tests() {
    let temp = tempfile::tempdir().expect("tempdir");
    let diff = temp.path().join("change.diff");
    std::fs::write(
        &diff,
        "diff --git a/src/a.py b/src/a.py\n--- a/src/a.py\n+++ b/src/a.py\n@@ -1 +1 @@\n-x\n+y\n",
    )
    .expect("write");

    Command::cargo_bin("taskforge")
        .expect("binary")
        .args(["split", "--diff"])
        .arg(&diff)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no test-classified files"));
}
