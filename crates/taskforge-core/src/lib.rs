//! taskforge-core — turn historical bug-fix changes into self-verifying
//! regression-test oracles.
//!
//! Given a repository at a base revision and a pull request's diff, the
//! engine produces a single executable check that fails when only the
//! PR's test changes are applied (the buggy state) and passes once its
//! fix changes are additionally applied (the fixed state). That
//! discriminating script — the oracle — is the unit of value consumed
//! downstream, e.g. as the reward signal of an automated-repair
//! evaluation harness.
//!
//! # Architecture
//!
//! ```text
//!   fetch ──▶ diff::split ──▶ workspace ◀──▶ session ◀── proposing actor
//!                                │             │
//!                                │         screen ▸ validate
//!                                ▼             │
//!                            pipeline ◀── accepted oracle ──▶ task record
//! ```
//!
//! - [`diff`] — unified-diff model and the test/fix/ignore splitter.
//! - [`workspace`] — checked-out repository with deterministic
//!   base/buggy/fixed transitions and bounded command execution.
//! - [`screen`] — static rejection of oracles that never run a test.
//! - [`validate`] — the two-state differential validation protocol.
//! - [`session`] — the bounded loop coordinating the external proposing
//!   actor.
//! - [`fetch`] — narrow interface to the code-hosting metadata service.
//! - [`task`] — packaging record, Dockerfile rendering, detection
//!   heuristics.
//! - [`pipeline`] — end-to-end orchestration and batch generation.
//! - [`config`] — TOML configuration for all of the above.

pub mod config;
pub mod diff;
pub mod fetch;
pub mod pipeline;
pub mod screen;
pub mod session;
pub mod task;
pub mod validate;
pub mod workspace;

pub use config::ForgeConfig;
pub use diff::{ChangeSet, ClassifyPolicy, DiffError, DiffSplit};
pub use fetch::{ChangeFetcher, ChangeRecord, FetchError, GitHubFetcher, MockChangeFetcher};
pub use pipeline::{GeneratedTask, Pipeline, PipelineError};
pub use screen::{HackingScreen, ScreeningRejection};
pub use session::{
    AcceptedOracle, OracleSession, Proposer, ProposerAction, ScriptedProposer, SessionConfig,
    SessionError, SessionOutcome,
};
pub use task::TaskRecord;
pub use validate::{DifferentialValidator, ValidationError, ValidationVerdict, VerdictCategory};
pub use workspace::{RunExit, RunOutput, Workspace, WorkspaceError, WorkspaceState};
