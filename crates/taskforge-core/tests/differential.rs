//! End-to-end differential validation against a real git repository.
//!
//! Builds a tiny shell-based project with a case-sensitivity bug, then
//! drives the workspace, validator, and session through the full
//! accept/reject matrix using nothing beyond git and sh.

use std::path::Path;
use std::process::Command;

use taskforge_core::diff::ChangeSet;
use taskforge_core::screen::HackingScreen;
use taskforge_core::session::{
    OracleSession, ProposerAction, ScriptedProposer, SessionConfig, SessionOutcome, TargetState,
};
use taskforge_core::validate::{DifferentialValidator, VerdictCategory};
use taskforge_core::workspace::Workspace;

/// Base file: a URL scheme check that wrongly rejects uppercase
/// schemes.
const SCHEME_SH: &str = "\
#!/bin/sh
is_http() {
    case \"$1\" in
        http://*) return 0 ;;
        *) return 1 ;;
    esac
}
";

/// Test changeset: adds a check asserting uppercase schemes are
/// accepted.
const TEST_PATCH: &str = "\
diff --git a/tests/check_scheme.sh b/tests/check_scheme.sh
new file mode 100644
--- /dev/null
+++ b/tests/check_scheme.sh
@@ -0,0 +1,7 @@
+#!/bin/sh
+. ./src/scheme.sh
+if ! is_http \"HTTP://example.com\"; then
+    echo \"uppercase scheme rejected\"
+    exit 1
+fi
+exit 0
";

/// Fix changeset: makes the scheme check case-insensitive.
const FIX_PATCH: &str = "\
diff --git a/src/scheme.sh b/src/scheme.sh
--- a/src/scheme.sh
+++ b/src/scheme.sh
@@ -1,7 +1,8 @@
 #!/bin/sh
 is_http() {
-    case \"$1\" in
+    scheme=$(printf '%s' \"$1\" | tr '[:upper:]' '[:lower:]')
+    case \"$scheme\" in
         http://*) return 0 ;;
         *) return 1 ;;
     esac
 }
";

/// Oracle that runs the added check.
const ORACLE: &str = "#!/bin/bash\nsh tests/check_scheme.sh\n";

fn git(repo: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(repo)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .output()
        .expect("git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

/// Build the workspace layout: `<root>/repo` with one commit.
fn build_workspace(root: &Path) -> Workspace {
    let repo = root.join("repo");
    std::fs::create_dir_all(repo.join("src")).expect("mkdir");
    git(&repo, &["init"]);
    git(&repo, &["config", "user.name", "Test"]);
    git(&repo, &["config", "user.email", "test@test.invalid"]);
    std::fs::write(repo.join("src/scheme.sh"), SCHEME_SH).expect("write");
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-m", "initial"]);
    Workspace::adopt(root).expect("adopt")
}

fn changesets() -> (ChangeSet, ChangeSet) {
    (
        ChangeSet::parse(TEST_PATCH).expect("test patch"),
        ChangeSet::parse(FIX_PATCH).expect("fix patch"),
    )
}

#[tokio::test]
async fn scenario_a_discriminating_oracle_is_accepted() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut ws = build_workspace(temp.path());
    let (test, fix) = changesets();
    ws.stage_changes(&test, &fix).expect("stage");

    let validator = DifferentialValidator::default();
    let verdict = validator.validate(&mut ws, ORACLE).await.expect("validate");

    assert_eq!(verdict.buggy_exit, 1);
    assert_eq!(verdict.fixed_exit, 0);
    assert!(verdict.accepted());
    assert_eq!(verdict.category, VerdictCategory::Accepted);
}

#[tokio::test]
async fn scenario_b_noop_fix_yields_both_fail() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut ws = build_workspace(temp.path());
    let (test, _) = changesets();
    let empty_fix = ChangeSet::from_files(Vec::new());
    ws.stage_changes(&test, &empty_fix).expect("stage");

    let validator = DifferentialValidator::default();
    let verdict = validator.validate(&mut ws, ORACLE).await.expect("validate");

    assert_eq!(verdict.buggy_exit, 1);
    assert_eq!(verdict.fixed_exit, 1);
    assert!(!verdict.accepted());
    assert_eq!(verdict.category, VerdictCategory::BothFail);
}

#[tokio::test]
async fn scenario_c_unconditional_success_yields_both_pass() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut ws = build_workspace(temp.path());
    let (test, fix) = changesets();
    ws.stage_changes(&test, &fix).expect("stage");

    let validator = DifferentialValidator::default();
    let verdict = validator
        .validate(&mut ws, "#!/bin/bash\nexit 0\n")
        .await
        .expect("validate");

    assert_eq!(verdict.buggy_exit, 0);
    assert!(!verdict.accepted());
    assert_eq!(verdict.category, VerdictCategory::BothPass);
}

#[tokio::test]
async fn verdicts_are_deterministic_across_fresh_resets() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut ws = build_workspace(temp.path());
    let (test, fix) = changesets();
    ws.stage_changes(&test, &fix).expect("stage");

    let validator = DifferentialValidator::default();
    let first = validator.validate(&mut ws, ORACLE).await.expect("first");
    let second = validator.validate(&mut ws, ORACLE).await.expect("second");

    assert_eq!(first, second);
}

#[tokio::test]
async fn session_accepts_after_exploration_and_state_switches() {
    let temp = tempfile::tempdir().expect("tempdir");
    let ws = build_workspace(temp.path());
    let (test, fix) = changesets();

    let mut session = OracleSession::new(ws, &test, &fix, SessionConfig::default())
        .expect("session")
        .with_screen(HackingScreen::new().with_extra_runners(["sh tests/"]));

    let mut actor = ScriptedProposer::new([
        ProposerAction::Execute {
            command: "ls tests".to_string(),
        },
        ProposerAction::Switch {
            target: TargetState::Fixed,
        },
        ProposerAction::Switch {
            target: TargetState::Buggy,
        },
        ProposerAction::Submit {
            script: ORACLE.to_string(),
        },
    ]);

    let outcome = session
        .run(&mut actor, "find the failing check".to_string())
        .await
        .expect("session run");

    match outcome {
        SessionOutcome::Accepted(oracle) => {
            assert_eq!(oracle.buggy_exit, 1);
            assert_eq!(oracle.fixed_exit, 0);
            assert_eq!(oracle.script, ORACLE);
            assert!(oracle.test_patch.contains("check_scheme.sh"));
            assert!(oracle.fix_patch.contains("tr '[:upper:]'"));
        }
        other => panic!("expected acceptance, got {other:?}"),
    }
}

#[tokio::test]
async fn session_feeds_back_rejection_then_accepts_revision() {
    let temp = tempfile::tempdir().expect("tempdir");
    let ws = build_workspace(temp.path());
    let (test, fix) = changesets();

    let mut session = OracleSession::new(ws, &test, &fix, SessionConfig::default())
        .expect("session")
        .with_screen(HackingScreen::new().with_extra_runners(["sh tests/"]));

    // First submission only greps; the screen rejects it and the
    // session must recover into another turn.
    let mut actor = ScriptedProposer::new([
        ProposerAction::Submit {
            script: "#!/bin/bash\ngrep -q lower src/scheme.sh\n".to_string(),
        },
        ProposerAction::Submit {
            script: ORACLE.to_string(),
        },
    ]);

    let outcome = session
        .run(&mut actor, String::new())
        .await
        .expect("session run");
    assert!(matches!(outcome, SessionOutcome::Accepted(_)));
}

#[tokio::test]
async fn malformed_input_changesets_escalate() {
    let temp = tempfile::tempdir().expect("tempdir");
    let ws = build_workspace(temp.path());

    let conflicting = ChangeSet::parse(
        "\
diff --git a/src/scheme.sh b/src/scheme.sh
--- a/src/scheme.sh
+++ b/src/scheme.sh
@@ -1,2 +1,2 @@
 #!/bin/csh
-no_such_line
+replacement
",
    )
    .expect("parse");
    let (_, fix) = changesets();

    let mut session = OracleSession::new(ws, &conflicting, &fix, SessionConfig::default())
        .expect("session");
    let mut actor = ScriptedProposer::submit_once(ORACLE);

    let err = session.run(&mut actor, String::new()).await.unwrap_err();
    assert!(
        matches!(err, taskforge_core::session::SessionError::InputChangesets { .. }),
        "expected InputChangesets, got {err:?}"
    );
}
