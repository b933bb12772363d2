//! Command list loading and validation
//!
//! A command file is a JSON array of objects:
//!
//! ```json
//! [
//!   { "command": "sudo apt update", "description": "Update package lists" },
//!   { "command": "sudo apt upgrade -y" }
//! ]
//! ```
//!
//! Loading is strict: the first invalid element aborts the load and no
//! partial sequence is returned. Fields other than `command` and
//! `description` are ignored.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::LoadError;

/// A single command plus optional human-readable description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    command: String,
    description: Option<String>,
}

impl CommandDescriptor {
    /// Descriptor without description
    ///
    /// No validation happens here; the runner skips blank commands.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: None,
        }
    }

    /// Attach a description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether the command is empty or whitespace only
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.command.trim().is_empty()
    }
}

/// Ordered commands; insertion order is execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSequence {
    commands: Vec<CommandDescriptor>,
}

impl CommandSequence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor
    pub fn push(&mut self, descriptor: CommandDescriptor) {
        self.commands.push(descriptor);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CommandDescriptor> {
        self.commands.iter()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CommandDescriptor> {
        self.commands.get(index)
    }
}

impl From<Vec<CommandDescriptor>> for CommandSequence {
    fn from(commands: Vec<CommandDescriptor>) -> Self {
        Self { commands }
    }
}

impl FromIterator<CommandDescriptor> for CommandSequence {
    fn from_iter<I: IntoIterator<Item = CommandDescriptor>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CommandSequence {
    type Item = &'a CommandDescriptor;
    type IntoIter = std::slice::Iter<'a, CommandDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

/// Load and validate a command file
///
/// # Errors
/// `NotFound` if the file is missing, `Io` for other read failures,
/// `ParseError` for malformed JSON and `FormatError` for the wrong shape
pub fn load_commands(path: impl AsRef<Path>) -> Result<CommandSequence, LoadError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
        _ => LoadError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let document: Value = serde_json::from_slice(&bytes)?;
    let commands = validate(document)?;
    debug!(path = %path.display(), count = commands.len(), "loaded command list");
    Ok(commands)
}

/// Validate a command list held in memory
///
/// # Errors
/// `ParseError` for malformed JSON and `FormatError` for the wrong shape
pub fn parse_commands(text: &str) -> Result<CommandSequence, LoadError> {
    let document: Value = serde_json::from_str(text)?;
    validate(document)
}

fn validate(document: Value) -> Result<CommandSequence, LoadError> {
    let Value::Array(items) = document else {
        return Err(LoadError::FormatError("root must be an array".to_string()));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| validate_element(i + 1, item))
        .collect()
}

fn validate_element(position: usize, item: Value) -> Result<CommandDescriptor, LoadError> {
    let Value::Object(mut fields) = item else {
        return Err(LoadError::FormatError(format!(
            "element {position} must be an object"
        )));
    };

    let command = match fields.remove("command") {
        Some(Value::String(command)) if !command.trim().is_empty() => command,
        _ => {
            return Err(LoadError::FormatError(format!(
                "element {position} requires a non-empty string \"command\""
            )));
        }
    };

    let description = match fields.remove("description") {
        Some(Value::String(description)) => Some(description),
        _ => None,
    };

    Ok(CommandDescriptor {
        command,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_list_keeps_order_and_descriptions() {
        let commands = parse_commands(
            r#"[
                {"command": "sudo apt update", "description": "Update list"},
                {"command": "sudo apt upgrade -y"},
                {"command": "uptime", "description": 42, "retries": 3}
            ]"#,
        )
        .unwrap();

        assert_eq!(commands.len(), 3);
        let first = commands.get(0).unwrap();
        assert_eq!(first.command(), "sudo apt update");
        assert_eq!(first.description(), Some("Update list"));
        assert_eq!(commands.get(1).unwrap().description(), None);
        assert_eq!(commands.get(2).unwrap().command(), "uptime");
        // non-string description dropped silently
        assert_eq!(commands.get(2).unwrap().description(), None);
    }

    #[test]
    fn test_empty_array_is_valid() {
        assert!(parse_commands("[]").unwrap().is_empty());
    }

    #[test]
    fn test_root_must_be_array() {
        let err = parse_commands(r#"{"command":"x"}"#).unwrap_err();
        match err {
            LoadError::FormatError(msg) => assert!(msg.contains("root must be an array")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_element_must_be_object() {
        let err = parse_commands(r#"[{"command":"ok"}, "echo hi"]"#).unwrap_err();
        match err {
            LoadError::FormatError(msg) => assert!(msg.contains("element 2 must be an object")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_or_blank_command_fails_whole_load() {
        for input in [
            r#"[{"command":"ok"}, {"cmd":"echo test"}]"#,
            r#"[{"command":"ok"}, {"command":""}]"#,
            r#"[{"command":"ok"}, {"command":"   "}]"#,
            r#"[{"command":"ok"}, {"command": 7}]"#,
        ] {
            match parse_commands(input) {
                Err(LoadError::FormatError(msg)) => assert!(msg.contains("element 2"), "{msg}"),
                other => panic!("expected format error for {input}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = parse_commands("[{\"command\": \"x\"").unwrap_err();
        assert!(matches!(err, LoadError::ParseError { line: 1, .. }));
    }

    #[test]
    fn test_load_distinguishes_not_found() {
        let err = load_commands("/nonexistent/sshbatch/commands.json").unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.json");
        fs::write(&path, r#"[{"command":"echo a"},{"command":"echo b"}]"#).unwrap();

        let commands = load_commands(&path).unwrap();
        let names: Vec<&str> = commands.iter().map(CommandDescriptor::command).collect();
        assert_eq!(names, vec!["echo a", "echo b"]);
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.json");
        fs::write(&path, b"[{\"command\":\"\xff\"}]").unwrap();

        assert!(matches!(
            load_commands(&path),
            Err(LoadError::ParseError { .. })
        ));
    }

    #[test]
    fn test_blank_descriptor_from_other_producers() {
        assert!(CommandDescriptor::new("  ").is_blank());
        assert!(!CommandDescriptor::new("ls").is_blank());
    }
}
