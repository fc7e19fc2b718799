//! Completion predicates for the VOS administrative CLI.
//!
//! The CLI gives no structured responses, so completion is decided purely from
//! streamed text. Each command category has its own predicate.

use serde::Serialize;

/// Prompt printed by the VOS CLI when it is ready for input.
pub const PROMPT: &str = "admin:";
pub const STARTED_MARKER: &str = "[STARTED]";
pub const STARTING_MARKER: &str = "[STARTING]";
pub const FAILED_MARKER: &str = "[FAILED]";
pub const ERROR_MARKER: &str = "ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// `utils service restart ...` style commands with `[STARTED]`/`[FAILED]` markers.
    ServiceRestart,
    /// Any other command; done once the prompt returns after the command echo.
    Generic,
    /// Connectivity test: no command, waits for the prompt only.
    ProbeOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Succeeded,
    Failed(String),
}

impl CommandKind {
    /// Decides completion for the latest `chunk` as received, with `buffer`
    /// holding the captured output so far. Once the capture cap is reached the
    /// buffer stops growing, so markers are looked for in the chunk as well.
    pub fn evaluate(&self, chunk: &str, buffer: &str, command: &str) -> Verdict {
        match self {
            CommandKind::ServiceRestart => {
                if let Some(marker) = failure_marker(buffer).or_else(|| failure_marker(chunk)) {
                    return Verdict::Failed(format!("service restart reported {marker}"));
                }
                if chunk.contains(STARTED_MARKER) && chunk.contains(PROMPT) {
                    return Verdict::Succeeded;
                }
                Verdict::Continue
            }
            // Requiring the echoed command guards against the prompt printed
            // before the command was sent. Output that itself contains the
            // command text can still match early.
            CommandKind::Generic => {
                if chunk.contains(PROMPT) && buffer.contains(command) {
                    Verdict::Succeeded
                } else {
                    Verdict::Continue
                }
            }
            CommandKind::ProbeOnly => {
                if chunk.contains(PROMPT) || buffer.contains(PROMPT) {
                    Verdict::Succeeded
                } else {
                    Verdict::Continue
                }
            }
        }
    }

    pub fn sends_command(&self) -> bool {
        !matches!(self, CommandKind::ProbeOnly)
    }
}

fn failure_marker(buffer: &str) -> Option<&'static str> {
    [FAILED_MARKER, ERROR_MARKER]
        .into_iter()
        .find(|marker| buffer.contains(marker))
}

/// True when a chunk reports a service still coming up.
pub fn reports_starting(chunk: &str) -> bool {
    chunk.contains(STARTING_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESTART: &str = "utils service restart Cisco Tomcat";

    #[test]
    fn restart_succeeds_on_started_and_prompt_in_same_chunk() {
        let chunk = "...restarting...\n[STARTED]\nadmin:";
        let buffer = format!("{RESTART}\n{chunk}");
        assert_eq!(
            CommandKind::ServiceRestart.evaluate(chunk, &buffer, RESTART),
            Verdict::Succeeded
        );
    }

    #[test]
    fn restart_waits_when_prompt_arrives_in_a_later_chunk() {
        let chunk = "Cisco Tomcat[STARTED]\n";
        assert_eq!(
            CommandKind::ServiceRestart.evaluate(chunk, chunk, RESTART),
            Verdict::Continue
        );
    }

    #[test]
    fn restart_fails_on_failure_markers_anywhere_in_buffer() {
        let buffer = "Cisco Tomcat[FAILED]\n...";
        assert!(matches!(
            CommandKind::ServiceRestart.evaluate("...", buffer, RESTART),
            Verdict::Failed(_)
        ));
        let buffer = "ERROR: service not found\nadmin:";
        assert!(matches!(
            CommandKind::ServiceRestart.evaluate("admin:", buffer, RESTART),
            Verdict::Failed(_)
        ));
    }

    #[test]
    fn generic_requires_echoed_command() {
        let command = "show status";
        assert_eq!(
            CommandKind::Generic.evaluate("admin:", "Welcome\nadmin:", command),
            Verdict::Continue
        );
        assert_eq!(
            CommandKind::Generic.evaluate(
                "Host Name : cucm\nadmin:",
                "admin:show status\nHost Name : cucm\nadmin:",
                command
            ),
            Verdict::Succeeded
        );
    }

    #[test]
    fn probe_only_needs_any_prompt() {
        assert_eq!(
            CommandKind::ProbeOnly.evaluate("", "Welcome to the Platform\nadmin:", ""),
            Verdict::Succeeded
        );
        assert_eq!(
            CommandKind::ProbeOnly.evaluate("Command Line Interface is starting up", "Command Line Interface is starting up", ""),
            Verdict::Continue
        );
        assert!(!CommandKind::ProbeOnly.sends_command());
    }

    #[test]
    fn markers_past_a_full_buffer_still_count() {
        let full = format!("{RESTART}\n{}", "x".repeat(64));
        assert!(matches!(
            CommandKind::ServiceRestart.evaluate("Cisco Tomcat[FAILED]", &full, RESTART),
            Verdict::Failed(_)
        ));
        assert_eq!(CommandKind::ProbeOnly.evaluate("admin:", "xxxx", ""), Verdict::Succeeded);
    }

    #[test]
    fn starting_marker_is_progress_only() {
        assert!(reports_starting("Cisco Tomcat[STARTING]"));
        assert_eq!(
            CommandKind::ServiceRestart.evaluate("Cisco Tomcat[STARTING]", "Cisco Tomcat[STARTING]", RESTART),
            Verdict::Continue
        );
    }
}
