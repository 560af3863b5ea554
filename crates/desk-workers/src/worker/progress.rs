//! Tool-call descriptions and progress-line detection.

use serde_json::Value;
use std::path::Path;

use agent_desk_core::text::{first_line, truncate_chars};

use crate::events::{Progress, ProgressKind, TodoItem};

const MAX_DETAIL_CHARS: usize = 80;

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn short(text: &str) -> String {
    truncate_chars(first_line(text), MAX_DETAIL_CHARS, "...")
}

/// Render `mcp__namespace__function` as `namespace: function`.
pub fn display_tool_name(name: &str) -> String {
    if let Some(rest) = name.strip_prefix("mcp__") {
        if let Some((namespace, function)) = rest.split_once("__") {
            return format!("{namespace}: {function}");
        }
    }
    name.to_string()
}

/// Reshape a todo-list tool input into `{content, status}` items.
pub fn todos_from_input(input: &Value) -> Vec<TodoItem> {
    input
        .get("todos")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let content = str_field(item, "content")
                        .or_else(|| str_field(item, "activeForm"))
                        .or_else(|| str_field(item, "title"))?;
                    Some(TodoItem {
                        content: content.to_string(),
                        status: str_field(item, "status").unwrap_or("pending").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Progress event describing a tool invocation.
pub fn describe_tool_use(name: &str, input: &Value) -> Progress {
    let mut progress = Progress::new(ProgressKind::ToolUse, String::new());
    progress.tool = Some(name.to_string());
    progress.input = Some(input.clone());

    let path = str_field(input, "file_path").or_else(|| str_field(input, "notebook_path"));
    if let Some(p) = path {
        progress.file_path = Some(p.to_string());
    }

    progress.message = match name {
        "Read" => format!("Reading {}", path.map(file_name).unwrap_or_else(|| "file".into())),
        "Write" => {
            progress.is_artifact = Some(true);
            format!("Writing {}", path.map(file_name).unwrap_or_else(|| "file".into()))
        }
        "Edit" | "MultiEdit" => {
            progress.is_artifact = Some(true);
            format!("Editing {}", path.map(file_name).unwrap_or_else(|| "file".into()))
        }
        "NotebookEdit" => {
            progress.is_artifact = Some(true);
            format!("Editing notebook {}", path.map(file_name).unwrap_or_default())
        }
        "Bash" => match str_field(input, "description") {
            Some(desc) => short(desc),
            None => format!("Running: {}", short(str_field(input, "command").unwrap_or(""))),
        },
        "Glob" => format!("Finding files matching {}", str_field(input, "pattern").unwrap_or("*")),
        "Grep" => format!("Searching for {}", short(str_field(input, "pattern").unwrap_or(""))),
        "LS" => format!("Listing {}", str_field(input, "path").map(file_name).unwrap_or_default()),
        "WebFetch" => format!("Fetching {}", str_field(input, "url").unwrap_or("a web page")),
        "WebSearch" => format!("Searching the web for {}", short(str_field(input, "query").unwrap_or(""))),
        "Task" => format!("Delegating: {}", short(str_field(input, "description").unwrap_or("subtask"))),
        "TodoWrite" => {
            progress.todos = Some(todos_from_input(input));
            "Updating task list".to_string()
        }
        other if other.starts_with("mcp__") => display_tool_name(other),
        other => format!("Using {other}"),
    };
    progress.message = progress.message.trim_end().to_string();
    progress
}

/// Progress event for a tool result.
pub fn describe_tool_result(is_error: bool) -> Progress {
    let mut progress = Progress::new(
        ProgressKind::ToolResult,
        if is_error { "Tool reported an error" } else { "Tool finished" },
    );
    progress.is_error = Some(is_error);
    progress
}

/// Whether assistant text looks like an intermediate narration line
/// ("Let me check the tests:") rather than part of the answer.
pub fn is_progress_line(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && !trimmed.contains('\n')
        && trimmed.chars().count() < 150
        && trimmed.ends_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn describes_file_tools_with_artifacts() {
        let p = describe_tool_use("Edit", &json!({"file_path": "/w/src/main.rs"}));
        assert_eq!(p.message, "Editing main.rs");
        assert_eq!(p.file_path.as_deref(), Some("/w/src/main.rs"));
        assert_eq!(p.is_artifact, Some(true));

        let p = describe_tool_use("Read", &json!({"file_path": "/w/Cargo.toml"}));
        assert_eq!(p.message, "Reading Cargo.toml");
        assert_eq!(p.is_artifact, None);
    }

    #[test]
    fn describes_bash_by_first_line() {
        let p = describe_tool_use("Bash", &json!({"command": "cargo test\necho done"}));
        assert_eq!(p.message, "Running: cargo test");
        let p = describe_tool_use("Bash", &json!({"command": "ls", "description": "List files"}));
        assert_eq!(p.message, "List files");
    }

    #[test]
    fn reshapes_todos() {
        let input = json!({"todos": [
            {"content": "Write tests", "status": "in_progress", "id": "1"},
            {"activeForm": "Fixing bug"},
            {"status": "completed"}
        ]});
        let p = describe_tool_use("TodoWrite", &input);
        assert_eq!(
            p.todos.unwrap(),
            vec![
                TodoItem { content: "Write tests".into(), status: "in_progress".into() },
                TodoItem { content: "Fixing bug".into(), status: "pending".into() },
            ]
        );
    }

    #[test]
    fn namespaced_tools() {
        assert_eq!(display_tool_name("mcp__github__create_issue"), "github: create_issue");
        assert_eq!(display_tool_name("mcp__broken"), "mcp__broken");
        assert_eq!(describe_tool_use("mcp__db__query", &json!({})).message, "db: query");
        assert_eq!(describe_tool_use("Frobnicate", &json!({})).message, "Using Frobnicate");
    }

    #[test]
    fn progress_line_heuristic() {
        assert!(is_progress_line("Let me look at the tests:"));
        assert!(is_progress_line("  Checking config:\n"));
        assert!(!is_progress_line("Done."));
        assert!(!is_progress_line("Steps:\n1. a\n2. b"));
        assert!(!is_progress_line(&format!("{}:", "x".repeat(150))));
        assert!(!is_progress_line(""));
    }
}
