//! Built-in subagent types

use crate::tools::{CATEGORY_FILESYSTEM, CATEGORY_SHELL, CATEGORY_WEB};

/// A kind of subagent: its prompt and the tool categories it gets
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub agent_type: String,
    pub name: String,
    pub system_prompt: String,
    pub categories: Vec<String>,
}

impl AgentProfile {
    pub fn new(
        agent_type: impl Into<String>,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        categories: &[&str],
    ) -> Self {
        Self {
            agent_type: agent_type.into(),
            name: name.into(),
            system_prompt: system_prompt.into(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn researcher() -> Self {
        Self::new(
            "researcher",
            "Researcher",
            format!(
                "You are a research subagent. Find accurate, current information on the web, \
                 compare sources and report concise findings with URLs.\n\n{}",
                COMMON_RULES
            ),
            &[CATEGORY_WEB],
        )
    }

    pub fn coder() -> Self {
        Self::new(
            "coder",
            "Coder",
            format!(
                "You are a coding subagent. Read, write and edit files in the workspace and run \
                 commands to build and test your changes. Report what you changed.\n\n{}",
                COMMON_RULES
            ),
            &[CATEGORY_FILESYSTEM, CATEGORY_SHELL],
        )
    }

    pub fn general() -> Self {
        Self::new(
            "general",
            "General",
            format!(
                "You are a general-purpose subagent. Complete the delegated task with the tools \
                 you have and report the result.\n\n{}",
                COMMON_RULES
            ),
            &[CATEGORY_FILESYSTEM, CATEGORY_WEB, CATEGORY_SHELL],
        )
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::researcher(), Self::coder(), Self::general()]
    }
}

const COMMON_RULES: &str = "You work for the main agent, not the user. \
If you need a decision or information you cannot find, call ask_main_agent and wait for the answer. \
Finish with a plain-text summary of your result.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_categories() {
        let profiles = AgentProfile::builtin();
        let types: Vec<_> = profiles.iter().map(|p| p.agent_type.as_str()).collect();
        assert_eq!(types, vec!["researcher", "coder", "general"]);

        assert_eq!(AgentProfile::researcher().categories, vec!["web"]);
        assert_eq!(AgentProfile::coder().categories, vec!["filesystem", "shell"]);
        assert_eq!(AgentProfile::general().categories.len(), 3);
        assert!(AgentProfile::coder().system_prompt.contains("ask_main_agent"));
    }
}
