//! System Prompt
//!
//! Renders the system message from a template and an `AgentContext`
//! snapshot. Rendering is pure: the same context and tool list always give
//! the same text, and a fresh prompt is rendered at the start of every turn
//! so project changes are picked up without restarting.

use std::collections::HashMap;

use crate::context::AgentContext;
use crate::types::Message;

/// Template variables available to prompts, as `{{name}}`.
pub fn prompt_variables(ctx: &AgentContext, tools: &[String]) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("user", ctx.user.clone());
    vars.insert(
        "home",
        ctx.home
            .as_ref()
            .map(|h| h.display().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    );
    vars.insert("os", ctx.os.clone());
    vars.insert("working_dir", ctx.working_dir.display().to_string());
    vars.insert("tools", tools.join(", "));
    vars.insert(
        "project",
        ctx.project
            .as_ref()
            .map(|p| p.summary())
            .unwrap_or_else(|| "none".to_string()),
    );
    vars
}

/// Substitute `{{var}}` placeholders in one pass over the template.
/// Unknown placeholders are left as-is and substituted values are never
/// expanded again.
pub fn render_system_prompt(template: &str, ctx: &AgentContext, tools: &[String]) -> String {
    let vars = prompt_variables(ctx, tools);
    let mut prompt = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        prompt.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = &after[..close];
                match vars.get(key) {
                    Some(value) => prompt.push_str(value),
                    None => {
                        prompt.push_str("{{");
                        prompt.push_str(key);
                        prompt.push_str("}}");
                    }
                }
                rest = &after[close + 2..];
            }
            None => {
                prompt.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    prompt.push_str(rest);
    prompt
}

pub fn system_message(template: &str, ctx: &AgentContext, tools: &[String]) -> Message {
    Message::system(render_system_prompt(template, ctx, tools))
}

/// Default system prompt for the assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an experienced penetration tester and security analyst with expertise in web application security, OWASP Top 10, and vulnerability assessment, running with full terminal and computer access.

<role>
- Identify security vulnerabilities through systematic analysis
- Provide proof-of-concept examples where applicable
- Follow responsible disclosure principles
- Execute commands and file operations to support security testing
- Stay within the declared scope of the active project
</role>

<available_tools>
{{tools}}
</available_tools>

<analysis_method>
1. Categorize findings by OWASP Top 10 classification
2. Identify vulnerability type and potential impact
3. Rate severity (Critical/High/Medium/Low)
4. Provide specific remediation with code examples
5. Prioritize findings by exploitability and business risk
6. Use terminal tools to validate findings when applicable
</analysis_method>

<constraints>
- Validate findings before reporting
- For potentially destructive operations (rm, mv to overwrite, etc.), warn the user first
- Use absolute paths when possible for clarity
</constraints>

<terminal_workflow>
- Explain what you are about to do before calling a tool
- Explain command output clearly and suggest follow-up actions
- Link findings to specific files, hosts or endpoints
- Save reports and logs to files for documentation
</terminal_workflow>

<output_structure>
For each finding:
- Title: Brief vulnerability name
- Severity: Critical/High/Medium/Low/Info
- Impact: Business risk description
- Steps to Reproduce: Numbered list with actual commands used
- Remediation: Specific fix recommendation
- References: CWE/OWASP/CVE links
- Artifacts: File paths to saved reports/logs
</output_structure>

Active project: {{project}}
Current user: {{user}}
Current home directory: {{home}}
Working directory: {{working_dir}}
Operating system: {{os}}"#;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProjectInfo;

    fn ctx() -> AgentContext {
        AgentContext {
            project: None,
            working_dir: "/srv/engagement".into(),
            user: "alice".into(),
            home: Some("/home/alice".into()),
            os: "linux".into(),
        }
    }

    #[test]
    fn substitutes_context_variables() {
        let out = render_system_prompt(
            "{{user}} in {{working_dir}} with {{tools}}",
            &ctx(),
            &["read_file".into(), "nmap_scan".into()],
        );
        assert_eq!(out, "alice in /srv/engagement with read_file, nmap_scan");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let project = ProjectInfo {
            name: "{{os}}-lab".into(),
            target: None,
            scope: vec![],
        };
        let ctx = ctx().with_project(Some(project));
        let out = render_system_prompt("{{project}} on {{os}}, {{unknown}} {{open", &ctx, &[]);
        assert_eq!(out, "{{os}}-lab on linux, {{unknown}} {{open");
    }

    #[test]
    fn project_line_reflects_context() {
        let tools = vec![];
        let without = render_system_prompt(DEFAULT_SYSTEM_PROMPT, &ctx(), &tools);
        assert!(without.contains("Active project: none"));

        let with = render_system_prompt(
            DEFAULT_SYSTEM_PROMPT,
            &ctx().with_project(Some(ProjectInfo {
                name: "acme-webapp".into(),
                target: Some("https://acme.test".into()),
                scope: vec![],
            })),
            &tools,
        );
        assert!(with.contains("Active project: acme-webapp (target: https://acme.test)"));
        assert!(!with.contains("{{"));
    }

    #[test]
    fn unknown_placeholders_untouched() {
        assert_eq!(render_system_prompt("{{mystery}}", &ctx(), &[]), "{{mystery}}");
    }
}
