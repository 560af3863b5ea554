//! Stand-in for the assistant command-line tool, for integration testing.
//!
//! Speaks just enough stream-json to exercise the process-backed workers
//! through the real Tokio launcher.
//!
//! # Modes
//!
//! - Print mode (prompt as last argument): emits `system/init`, one
//!   `assistant` text block and a `result` line.
//! - Streaming input (`--input-format stream-json`): reads one `user` line
//!   from stdin, answers the same way, then waits for stdin to close.
//!
//! # Special behaviors
//!
//! - A prompt containing `old-runtime` makes the tool fail like an outdated
//!   Node.js would (stderr message, exit code 1).
//! - The answer reports the working directory and whether `HOME` is visible,
//!   so tests can check the launch environment.

use serde_json::{Value, json};
use std::io::{BufRead, Write};

fn emit(out: &mut impl Write, value: Value) {
    let _ = writeln!(out, "{value}");
    let _ = out.flush();
}

fn answer(prompt: &str) -> String {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let home = if std::env::var_os("HOME").is_some() {
        "present"
    } else {
        "absent"
    };
    format!("echo: {prompt} | cwd={cwd} | home={home}")
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let streaming_input = args.iter().any(|a| a == "--input-format");
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let prompt = if streaming_input {
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            std::process::exit(2);
        }
        let parsed: Value = serde_json::from_str(&line).unwrap_or(Value::Null);
        parsed["message"]["content"].as_str().unwrap_or_default().to_string()
    } else {
        args.last().cloned().unwrap_or_default()
    };

    if prompt.contains("old-runtime") {
        eprintln!("error: this tool requires Node.js >= 20.0.0 (found v16.20.2)");
        std::process::exit(1);
    }

    emit(
        &mut out,
        json!({"type": "system", "subtype": "init", "model": "fake-model", "session_id": "fake-session"}),
    );
    let text = answer(&prompt);
    emit(
        &mut out,
        json!({"type": "assistant", "message": {"content": [{"type": "text", "text": text}]}}),
    );
    emit(
        &mut out,
        json!({"type": "result", "subtype": "success", "is_error": false, "result": text, "session_id": "fake-session"}),
    );

    if streaming_input {
        let mut rest = String::new();
        while std::io::stdin().lock().read_line(&mut rest).unwrap_or(0) > 0 {
            rest.clear();
        }
    }
}
