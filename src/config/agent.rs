use serde::{Deserialize, Serialize};

/// Review agent settings (`agent` table in config.toml).
///
/// The agent is an external command that reads a review prompt on stdin and
/// writes the review text to stdout. Unset command disables review dispatch;
/// merge requests then stay `Pending` in the overview.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AgentConfig {
    /// Command to run, e.g. `ollama`. TOML: `agent.command`.
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments passed before the prompt, e.g. `["run", "mistral"]`.
    /// TOML: `agent.args`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Hard cap on the diff size fed to the agent, in bytes. Default: `65536`.
    #[serde(default = "default_max_diff_bytes")]
    pub max_diff_bytes: usize,
}

fn default_max_diff_bytes() -> usize {
    65_536
}
