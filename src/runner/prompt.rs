//! System prompt sent with `sampling/createMessage`.

use super::config::RunContext;

/// Build the deterministic system prompt for a run.
pub fn build_system_prompt(ctx: &RunContext) -> String {
    let env = &ctx.env;
    let lines = [
        "You are an automation specialist executing Playwright end-to-end tests against the application under test.".to_string(),
        "Always prefer reliable selectors such as data-testid or ARIA roles and wait for UI readiness before acting.".to_string(),
        String::new(),
        "## Execution Environment".to_string(),
        format!("- Base URL: {}", env.base_url),
        format!("- Browser headless mode: {}", env.headless),
        format!("- Default action timeout: {} ms", env.timeout_ms),
        format!("- Run identifier: {}", ctx.run_id),
        String::new(),
        "## Expectations".to_string(),
        "- Honour explicit screenshot names provided by the user instructions.".to_string(),
        "- Capture additional context (console logs, network failures) when steps error.".to_string(),
        "- Produce concise status updates for each step so the client can stream progress.".to_string(),
        "- Treat all credentials as already configured inside the application; do not request tokens from the client.".to_string(),
    ];
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::config::ProjectConfig;
    use std::path::PathBuf;

    fn context() -> RunContext {
        let config = ProjectConfig::from_jsonc(
            r#"{"defaultEnv": "local", "artifactsDir": "out",
                "environments": {"local": {"baseUrl": "http://localhost:4200", "timeoutMs": 1234}},
                "mcp": {"stdioCommand": ["server"]}}"#,
        )
        .unwrap();
        let env = config.environments["local"].clone();
        RunContext {
            env_name: "local".into(),
            env,
            config,
            run_id: "20240501-101010-smoke".into(),
            artifacts_root: PathBuf::from("out"),
        }
    }

    #[test]
    fn test_prompt_mentions_environment() {
        let prompt = build_system_prompt(&context());
        assert!(prompt.contains("- Base URL: http://localhost:4200"));
        assert!(prompt.contains("- Browser headless mode: true"));
        assert!(prompt.contains("- Default action timeout: 1234 ms"));
        assert!(prompt.contains("- Run identifier: 20240501-101010-smoke"));
        assert!(!prompt.starts_with(char::is_whitespace));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        assert_eq!(build_system_prompt(&context()), build_system_prompt(&context()));
    }
}
