//! Dockerfile text rendering for task instances.
//!
//! Renders the layered Dockerfile a downstream packager builds: base
//! image, repository clone at the base commit, dependency install, and
//! the oracle script. Rendering is text-only; building and pushing the
//! image is the packaging collaborator's concern.

use super::TaskRecord;
use super::detect::Language;

/// Render the Dockerfile for a task record.
#[must_use]
pub fn render_dockerfile(task: &TaskRecord, language: Language) -> String {
    let header = format!(
        "# Task instance Dockerfile\n\
         # Repository: {repo}\n\
         # Base commit: {base}\n\
         # Change: #{number}\n\n\
         FROM {image} AS base\n\n\
         RUN apt-get update && apt-get install -y \\\n    \
         git \\\n    \
         build-essential \\\n    \
         curl \\\n    \
         && rm -rf /var/lib/apt/lists/*\n\n\
         FROM base AS environment\n\n\
         WORKDIR /workspace\n\n\
         RUN git clone https://github.com/{repo}.git . && \\\n    \
         git checkout {base}\n",
        repo = task.repo,
        base = task.base_commit,
        number = task.pr_number,
        image = language.base_image(),
    );

    let deps = match language {
        Language::Python => {
            "\n# Project and test dependencies\n\
             RUN if [ -f requirements.txt ]; then pip install --no-cache-dir -r requirements.txt; fi\n\
             RUN if [ -f setup.py ] || [ -f pyproject.toml ]; then pip install --no-cache-dir -e .; fi\n\
             RUN pip install --no-cache-dir pytest pytest-cov tox\n"
        }
        Language::JavaScript => {
            "\n# Project dependencies\n\
             RUN if [ -f package-lock.json ]; then npm ci; else npm install; fi\n"
        }
        Language::Go => "\n# Module download\nRUN go mod download || true\n",
        Language::Rust => "\n# Pre-fetch crates\nRUN cargo fetch || true\n",
        Language::Java | Language::Unknown => "",
    };

    let footer = "\nFROM environment AS instance\n\n\
                  COPY eval_script.sh /workspace/eval_script.sh\n\
                  RUN chmod +x /workspace/eval_script.sh\n\n\
                  CMD [\"/workspace/eval_script.sh\"]\n";

    format!("{header}{deps}{footer}")
}
