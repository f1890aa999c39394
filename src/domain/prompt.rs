use crate::domain::{ProjectSummary, PromptPair, REPORT_END_MARKER, REPORT_START_MARKER, Timeframe};
use std::fmt::Write as _;

const MAX_SESSIONS_PER_PROJECT: usize = 40;

pub fn build_report_prompt(timeframe: Timeframe, projects: &[ProjectSummary]) -> PromptPair {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Summarize my AI coding sessions from {} across {} project{}.",
        timeframe.label(),
        projects.len(),
        if projects.len() == 1 { "" } else { "s" }
    );
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "Session logs are JSONL files. Read them to understand what was worked on, what got shipped, and where time went."
    );

    for project in projects {
        let _ = writeln!(prompt);
        let _ = writeln!(
            prompt,
            "Project: {} ({}) - {} session{}",
            project.name,
            project.path.display(),
            project.session_count,
            if project.session_count == 1 { "" } else { "s" }
        );
        for path in project.session_paths.iter().take(MAX_SESSIONS_PER_PROJECT) {
            let _ = writeln!(prompt, "  - {}", path.display());
        }
        let remaining = project
            .session_paths
            .len()
            .saturating_sub(MAX_SESSIONS_PER_PROJECT);
        if remaining > 0 {
            let _ = writeln!(prompt, "  - ... (+{remaining} older sessions)");
        }
    }

    let _ = writeln!(prompt);
    let _ = write!(
        prompt,
        "When you are done, output the complete HTML report between the lines {REPORT_START_MARKER} and {REPORT_END_MARKER}."
    );

    PromptPair {
        prompt,
        system_prompt: system_prompt(),
    }
}

fn system_prompt() -> String {
    format!(
        "You are a productivity analyst producing a self-contained HTML report. \
Use sub-agents for per-project analysis when there are several projects. \
Do not write any files. Emit the final report exactly once, starting with a line \
{REPORT_START_MARKER} and ending with a line {REPORT_END_MARKER}. \
The report must be a complete HTML document with inline CSS and a <body> element."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn project(name: &str, sessions: usize) -> ProjectSummary {
        ProjectSummary {
            name: name.to_string(),
            path: PathBuf::from(format!("/work/{name}")),
            last_activity: None,
            session_count: sessions,
            session_paths: (0..sessions)
                .map(|idx| PathBuf::from(format!("/logs/{name}/{idx}.jsonl")))
                .collect(),
            total_bytes: 0,
        }
    }

    #[test]
    fn prompt_lists_projects_and_markers() {
        let pair = build_report_prompt(Timeframe::LastDays(3), &[project("api", 2)]);
        assert!(pair.prompt.contains("the last 3 days across 1 project."));
        assert!(pair.prompt.contains("Project: api (/work/api) - 2 sessions"));
        assert!(pair.prompt.contains("/logs/api/1.jsonl"));
        assert!(pair.prompt.contains(REPORT_START_MARKER));
        assert!(pair.system_prompt.contains(REPORT_END_MARKER));
    }

    #[test]
    fn long_session_lists_are_capped() {
        let pair = build_report_prompt(Timeframe::Today, &[project("big", 45)]);
        assert!(pair.prompt.contains("(+5 older sessions)"));
        assert!(!pair.prompt.contains("/logs/big/44.jsonl"));
    }
}
