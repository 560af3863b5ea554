//! Classification of assistant process failures.

use regex::Regex;
use std::sync::LazyLock;

use crate::environment::REQUIRED_VERSION;

/// What kind of failure a stderr text describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    /// The runtime is too old to run the assistant tool
    RuntimeTooOld {
        /// Required version, when the message names one
        required: Option<String>,
    },
    /// Anything else
    Other,
}

static REQUIRES_VERSION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)requires\s+node(?:\.js)?\s*(?:version\s*)?(?:>=?\s*)?v?(\d+(?:\.\d+){0,2})",
        r"(?i)node(?:\.js)?\s+(?:version\s+)?v?(\d+(?:\.\d+){0,2})\s+or\s+(?:higher|newer|later)",
        r#"(?i)engine\s+"node"\s+is\s+incompatible.*?expected\s+"?>=\s*v?(\d+(?:\.\d+){0,2})"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static OLD_RUNTIME_HINTS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(unsupported\s+(?:node|engine)|SyntaxError:\s+Unexpected token '\?\?='|ERR_UNKNOWN_BUILTIN_MODULE)").ok()
});

/// Classify a process's error output.
pub fn classify_failure(stderr: &str) -> FailureClass {
    for pattern in REQUIRES_VERSION.iter() {
        if let Some(caps) = pattern.captures(stderr) {
            return FailureClass::RuntimeTooOld {
                required: caps.get(1).map(|m| m.as_str().to_string()),
            };
        }
    }
    if OLD_RUNTIME_HINTS.as_ref().is_some_and(|re| re.is_match(stderr)) {
        return FailureClass::RuntimeTooOld { required: None };
    }
    FailureClass::Other
}

/// Text shown to the user for a failed run.
///
/// Runtime-too-old failures become an upgrade message naming the required
/// version; anything else is the trimmed stderr, or `fallback` when empty.
pub fn friendly_failure(stderr: &str, fallback: &str) -> String {
    match classify_failure(stderr) {
        FailureClass::RuntimeTooOld { required } => {
            let version = required
                .map(|v| format!("v{}", v.trim_start_matches('v')))
                .unwrap_or_else(|| REQUIRED_VERSION.to_string());
            format!(
                "The assistant needs Node.js {version} or newer, but an older version was used. \
                 Install a current release (for example `nvm install 20`) and try again."
            )
        }
        FailureClass::Other => {
            let trimmed = stderr.trim();
            if trimmed.is_empty() {
                fallback.to_string()
            } else {
                trimmed.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_required_version() {
        assert_eq!(
            classify_failure("Error: Claude Code requires Node.js version 18.20.8 or higher"),
            FailureClass::RuntimeTooOld {
                required: Some("18.20.8".into())
            }
        );
        assert_eq!(
            classify_failure("fatal: requires node >= 20"),
            FailureClass::RuntimeTooOld {
                required: Some("20".into())
            }
        );
        assert_eq!(
            classify_failure("Please use Node.js v20.0.0 or newer."),
            FailureClass::RuntimeTooOld {
                required: Some("20.0.0".into())
            }
        );
    }

    #[test]
    fn hint_without_version() {
        assert_eq!(
            classify_failure("SyntaxError: Unexpected token '??='"),
            FailureClass::RuntimeTooOld { required: None }
        );
    }

    #[test]
    fn other_failures_pass_through() {
        assert_eq!(classify_failure("Invalid API key"), FailureClass::Other);
        assert_eq!(friendly_failure("  Invalid API key\n", "x"), "Invalid API key");
        assert_eq!(friendly_failure("", "exited with code 2"), "exited with code 2");
    }

    #[test]
    fn friendly_message_names_version() {
        let text = friendly_failure("requires Node.js 18.20.8", "x");
        assert!(text.contains("v18.20.8"));
        assert!(text.contains("nvm install"));
    }
}
