//! Control-protocol command parsing and reply framing.
//!
//! Grounded in `graphmanager.cpp`'s `HandleCommand`: a request is a list
//! of text frames, the first naming the command; replies start with
//! `OK`/`WARN`/`ERR` followed by optional detail frames (`spec.md` §6).

use crate::error::{FalconError, Result};

/// A parsed control-protocol request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GraphBuild { yaml: String },
    GraphBuildFile { path: String },
    GraphDestroy,
    GraphStart { run_env: Option<String>, dest: Option<String>, src: Option<String>, test: bool },
    GraphStop,
    GraphState,
    GraphUpdate { yaml: String },
    GraphRetrieve { yaml: String },
    GraphApply { yaml: String },
    GraphYaml,
    TestOn,
    TestOff,
    TestToggle,
    Info,
    Quit,
    Kill,
}

impl Command {
    /// Parse a request's frames (already UTF-8 decoded) into a command.
    pub fn parse(frames: &[String]) -> Result<Self> {
        let head = frames.first().map(String::as_str).unwrap_or("");
        match head {
            "graph" => Self::parse_graph(&frames[1..]),
            "test" => match frames.get(1).map(String::as_str) {
                Some("on") => Ok(Command::TestOn),
                Some("off") => Ok(Command::TestOff),
                Some("toggle") | None => Ok(Command::TestToggle),
                Some(other) => Err(FalconError::control(format!("unknown test command \"{other}\""))),
            },
            "info" => Ok(Command::Info),
            "quit" => Ok(Command::Quit),
            "kill" => Ok(Command::Kill),
            other => Err(FalconError::control(format!("unknown command \"{other}\""))),
        }
    }

    fn parse_graph(rest: &[String]) -> Result<Self> {
        let sub = rest.first().map(String::as_str).unwrap_or("");
        match sub {
            "build" => Ok(Command::GraphBuild { yaml: rest.get(1).cloned().unwrap_or_default() }),
            "buildfile" => Ok(Command::GraphBuildFile {
                path: rest.get(1).cloned().ok_or_else(|| FalconError::control("graph buildfile requires a path"))?,
            }),
            "destroy" => Ok(Command::GraphDestroy),
            "start" | "test" => Ok(Command::GraphStart {
                run_env: rest.get(1).cloned(),
                dest: rest.get(2).cloned(),
                src: rest.get(3).cloned(),
                test: sub == "test",
            }),
            "stop" => Ok(Command::GraphStop),
            "state" => Ok(Command::GraphState),
            "update" => Ok(Command::GraphUpdate { yaml: rest.get(1).cloned().unwrap_or_default() }),
            "retrieve" => Ok(Command::GraphRetrieve { yaml: rest.get(1).cloned().unwrap_or_default() }),
            "apply" => Ok(Command::GraphApply { yaml: rest.get(1).cloned().unwrap_or_default() }),
            "yaml" => Ok(Command::GraphYaml),
            other => Err(FalconError::control(format!("unknown graph command \"{other}\""))),
        }
    }
}

/// A reply: the `OK`/`WARN`/`ERR` status frame plus any detail frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub frames: Vec<String>,
}

impl Reply {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self { frames: vec!["OK".to_string(), detail.into()] }
    }

    pub fn ok_empty() -> Self {
        Self { frames: vec!["OK".to_string()] }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self { frames: vec!["WARN".to_string(), message.into()] }
    }

    pub fn err(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self { frames: vec!["ERR".to_string(), class.into(), message.into()] }
    }

    /// Build a reply from a `Result`, classifying the error by its variant
    /// name so the caller sees the same taxonomy as `spec.md` §7.
    pub fn from_result(result: Result<String>) -> Self {
        match result {
            Ok(detail) => Reply::ok(detail),
            Err(err) => Reply::err(error_class(&err), err.to_string()),
        }
    }
}

fn error_class(err: &FalconError) -> &'static str {
    match err {
        FalconError::Configuration { .. } => "configuration",
        FalconError::Build(_) => "build",
        FalconError::Prepare { .. } => "prepare",
        FalconError::Processing { .. } => "processing",
        FalconError::Control(_) => "control",
        FalconError::SharedState { .. } => "shared_state",
        FalconError::Timeout => "timeout",
        FalconError::RingBufferFull => "ring_buffer_full",
        FalconError::Io(_) => "io",
        FalconError::Unexpected(_) => "unexpected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_graph_start_with_optional_args() {
        let cmd = Command::parse(&frames(&["graph", "start", "env1", "dest1"])).unwrap();
        assert_eq!(
            cmd,
            Command::GraphStart {
                run_env: Some("env1".to_string()),
                dest: Some("dest1".to_string()),
                src: None,
                test: false
            }
        );
    }

    #[test]
    fn graph_test_forces_test_mode() {
        let cmd = Command::parse(&frames(&["graph", "test"])).unwrap();
        assert_eq!(cmd, Command::GraphStart { run_env: None, dest: None, src: None, test: true });
    }

    #[test]
    fn unknown_command_is_a_control_error() {
        assert!(Command::parse(&frames(&["bogus"])).is_err());
    }

    #[test]
    fn buildfile_requires_a_path() {
        assert!(Command::parse(&frames(&["graph", "buildfile"])).is_err());
    }

    #[test]
    fn reply_from_result_classifies_build_errors() {
        let reply = Reply::from_result(Err(FalconError::build("bad connection")));
        assert_eq!(reply.frames[0], "ERR");
        assert_eq!(reply.frames[1], "build");
    }
}
