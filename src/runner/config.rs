//! Project configuration (`config.jsonc`) and run context resolution.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::errors::RunnerError;

// ─── Settings ────────────────────────────────────────────────────────────────

fn default_headless() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_mode() -> String {
    "stdio".to_string()
}

/// Per-environment knobs passed through to the MCP server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSettings {
    pub base_url: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// How to reach the MCP server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpSettings {
    /// Only `"stdio"` is supported.
    #[serde(default = "default_mode")]
    pub mode: String,
    pub stdio_command: Vec<String>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub default_env: String,
    pub artifacts_dir: String,
    pub environments: BTreeMap<String, EnvironmentSettings>,
    pub mcp: McpSettings,
}

impl ProjectConfig {
    /// Parse JSONC text (comments allowed) and validate it.
    pub fn from_jsonc(text: &str) -> Result<Self, String> {
        let cleaned = strip_json_comments(text);
        let config: ProjectConfig = serde_json::from_str(&cleaned).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.mcp.mode != "stdio" {
            return Err(format!(
                "unsupported mcp.mode '{}' (only 'stdio' is supported)",
                self.mcp.mode
            ));
        }
        if self.mcp.stdio_command.first().map_or(true, |c| c.trim().is_empty()) {
            return Err("mcp.stdioCommand must name a program".to_string());
        }
        Ok(())
    }

    /// Look up an environment, falling back to `defaultEnv`.
    pub fn environment(&self, name: Option<&str>) -> Result<(&str, &EnvironmentSettings), RunnerError> {
        let target = name.unwrap_or(&self.default_env);
        match self.environments.get_key_value(target) {
            Some((key, env)) => Ok((key.as_str(), env)),
            None => {
                let known = self.environments.keys().cloned().collect::<Vec<_>>().join(", ");
                Err(RunnerError::UnknownEnvironment {
                    name: target.to_string(),
                    known: if known.is_empty() { "none".into() } else { known },
                })
            }
        }
    }
}

/// Load and validate a JSONC configuration file.
pub fn load_config(path: &Path) -> Result<ProjectConfig, RunnerError> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RunnerError::ConfigNotFound {
            path: path.to_path_buf(),
        },
        _ => RunnerError::InvalidConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })?;

    ProjectConfig::from_jsonc(&text).map_err(|reason| RunnerError::InvalidConfig {
        path: path.to_path_buf(),
        reason,
    })
}

/// Remove `//` and `/* */` comments that are not inside string literals.
pub fn strip_json_comments(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                // Keep the newline so line numbers in parse errors stay right.
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

// ─── Run Context ─────────────────────────────────────────────────────────────

/// Fully resolved runtime information for one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub env_name: String,
    pub env: EnvironmentSettings,
    pub config: ProjectConfig,
    pub run_id: String,
    pub artifacts_root: PathBuf,
}

impl RunContext {
    /// Directory holding this run's reports and artifacts.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.artifacts_root.join(&self.run_id)
    }
}

/// Select the environment and create the artifacts root under `base_dir`.
pub fn resolve_run_context(
    config: ProjectConfig,
    env_name: Option<&str>,
    run_id: &str,
    base_dir: &Path,
) -> Result<RunContext, RunnerError> {
    let (name, env) = config.environment(env_name)?;
    let (name, env) = (name.to_string(), env.clone());

    let artifacts_root = base_dir.join(&config.artifacts_dir);
    std::fs::create_dir_all(&artifacts_root)?;
    let artifacts_root = artifacts_root.canonicalize().unwrap_or(artifacts_root);

    Ok(RunContext {
        env_name: name,
        env,
        config,
        run_id: run_id.to_string(),
        artifacts_root,
    })
}

// ─── .env Files ──────────────────────────────────────────────────────────────

/// Load `KEY=VALUE` pairs from an optional `.env` file.
///
/// A missing file yields an empty map. Blank lines and `#` comments are
/// skipped, a leading `export ` is ignored, and matching surrounding quotes
/// are removed from values.
pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>, RunnerError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_env(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn parse_env(text: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        let value = value.trim();
        let value = ['"', '\'']
            .iter()
            .find_map(|q| {
                value
                    .strip_prefix(*q)
                    .and_then(|v| v.strip_suffix(*q))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }

    vars
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
    {
      // which environment to use by default
      "defaultEnv": "local",
      "artifactsDir": "artifacts/runs", /* relative to the base dir */
      "environments": {
        "local": { "baseUrl": "http://localhost:4200" },
        "staging": { "baseUrl": "https://staging.example.com//app", "headless": false, "timeoutMs": 5000 }
      },
      "mcp": { "stdioCommand": ["npx", "@playwright/mcp@latest"] }
    }
    "#;

    #[test]
    fn test_strip_comments_keeps_strings() {
        let raw = "{\"url\": \"http://x//y\", /* c */ \"a\": 1 // tail\n}";
        let cleaned = strip_json_comments(raw);
        let v: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(v["url"], "http://x//y");
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_strip_comments_escaped_quote() {
        let raw = r#"{"s": "say \"//hi\""}"#;
        assert_eq!(strip_json_comments(raw), raw);
    }

    #[test]
    fn test_parse_sample_config() {
        let config = ProjectConfig::from_jsonc(SAMPLE).unwrap();
        assert_eq!(config.default_env, "local");
        assert_eq!(config.mcp.mode, "stdio");
        assert_eq!(config.mcp.stdio_command, vec!["npx", "@playwright/mcp@latest"]);

        let local = &config.environments["local"];
        assert!(local.headless);
        assert_eq!(local.timeout_ms, 30_000);

        let staging = &config.environments["staging"];
        assert_eq!(staging.base_url, "https://staging.example.com//app");
        assert!(!staging.headless);
        assert_eq!(staging.timeout_ms, 5000);
    }

    #[test]
    fn test_validation_rejects_empty_command() {
        let text = SAMPLE.replace(r#"["npx", "@playwright/mcp@latest"]"#, "[]");
        let err = ProjectConfig::from_jsonc(&text).unwrap_err();
        assert!(err.contains("stdioCommand"));
    }

    #[test]
    fn test_undefined_default_env_fails_only_at_lookup() {
        let text = SAMPLE.replace(r#""defaultEnv": "local""#, r#""defaultEnv": "prod""#);
        let config = ProjectConfig::from_jsonc(&text).unwrap();

        let (name, env) = config.environment(Some("staging")).unwrap();
        assert_eq!(name, "staging");
        assert_eq!(env.timeout_ms, 5000);

        let err = config.environment(None).unwrap_err();
        assert!(err.to_string().contains("unknown environment 'prod'"));
    }

    #[test]
    fn test_unknown_environment_lists_known() {
        let config = ProjectConfig::from_jsonc(SAMPLE).unwrap();
        let err = config.environment(Some("qa")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown environment 'qa'. Known environments: local, staging"
        );
        let (name, _) = config.environment(None).unwrap();
        assert_eq!(name, "local");
    }

    #[test]
    fn test_load_config_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&tmp.path().join("config.jsonc")).unwrap_err();
        assert!(matches!(err, RunnerError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_resolve_run_context_creates_root() {
        let tmp = TempDir::new().unwrap();
        let config = ProjectConfig::from_jsonc(SAMPLE).unwrap();
        let ctx = resolve_run_context(config, Some("staging"), "20240101-000000-manual", tmp.path())
            .unwrap();

        assert_eq!(ctx.env_name, "staging");
        assert!(ctx.artifacts_root.is_dir());
        assert!(ctx.artifacts_root.ends_with("artifacts/runs"));
        assert!(ctx.artifacts_dir().ends_with("20240101-000000-manual"));
    }

    #[test]
    fn test_load_env_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(
            &path,
            "# creds\nBEDROCK_MODEL=\"anthropic.claude\"\nexport AWS_REGION='us-east-1'\n\nBROKEN\nEMPTY=\n",
        )
        .unwrap();

        let vars = load_env_file(&path).unwrap();
        assert_eq!(vars["BEDROCK_MODEL"], "anthropic.claude");
        assert_eq!(vars["AWS_REGION"], "us-east-1");
        assert_eq!(vars["EMPTY"], "");
        assert!(!vars.contains_key("BROKEN"));

        assert!(load_env_file(&tmp.path().join("missing.env")).unwrap().is_empty());
    }
}
