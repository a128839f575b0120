use crate::error::{AgentError, AgentResult};
use crate::focus::FocusTarget;

/// Chat window a question was addressed to with an `@` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTarget {
    Antigravity,
    VsCode,
    Cursor,
}

impl ChatTarget {
    pub fn name(&self) -> &'static str {
        match self {
            ChatTarget::Antigravity => "antigravity",
            ChatTarget::VsCode => "vscode",
            ChatTarget::Cursor => "cursor",
        }
    }
}

const ROUTES: &[(&str, ChatTarget)] = &[
    ("@ag ", ChatTarget::Antigravity),
    ("@antigravity ", ChatTarget::Antigravity),
    ("@vscode ", ChatTarget::VsCode),
    ("@cursor ", ChatTarget::Cursor),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrateKind {
    Regions,
    Input,
    Output,
}

impl CalibrateKind {
    /// Targets to calibrate, in order.
    pub fn targets(&self) -> &'static [FocusTarget] {
        match self {
            CalibrateKind::Regions => &[FocusTarget::Input, FocusTarget::Transcript],
            CalibrateKind::Input => &[FocusTarget::Input],
            CalibrateKind::Output => &[FocusTarget::Transcript],
        }
    }
}

/// A job's command text, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Position,
    Learn(FocusTarget),
    Status,
    Calibrate(CalibrateKind),
    DebugScreen,
    DebugLocate(FocusTarget),
    Capture,
    Open(String),
    Shell(String),
    Whoami,
    Ask { target: Option<ChatTarget>, question: String },
}

/// `rest` when `text` is `word` alone or `word` followed by whitespace.
fn strip_word<'t>(text: &'t str, word: &str) -> Option<&'t str> {
    let rest = text.strip_prefix(word)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

fn kind_arg(arg: &str, usage: &str) -> AgentResult<FocusTarget> {
    FocusTarget::from_kind(arg).ok_or_else(|| AgentError::usage(usage))
}

impl Command {
    /// Parse trimmed command text. Anything unrecognised goes to the IDE chat.
    ///
    /// Slash commands are case-sensitive. `whoami`, the `@` routing prefixes
    /// and `input`/`output` arguments are not.
    pub fn parse(text: &str) -> AgentResult<Command> {
        let text = text.trim();
        let lower = text.to_lowercase();

        if text == "/pos" {
            return Ok(Command::Position);
        }
        if let Some(rest) = strip_word(text, "/ide") {
            return Self::parse_ide(rest);
        }
        if text == "/capture" {
            return Ok(Command::Capture);
        }
        if let Some(rest) = strip_word(text, "/open") {
            if rest.is_empty() {
                return Err(AgentError::usage("Usage: /open [app_name]"));
            }
            return Ok(Command::Open(rest.to_string()));
        }
        if lower == "whoami" {
            return Ok(Command::Whoami);
        }
        if let Some(rest) = strip_word(text, "/sh") {
            if rest.is_empty() {
                return Err(AgentError::usage("Usage: /sh [shell command]"));
            }
            return Ok(Command::Shell(rest.to_string()));
        }

        for (prefix, target) in ROUTES {
            if lower.starts_with(prefix) {
                return Ok(Command::Ask {
                    target: Some(*target),
                    question: text[prefix.len()..].trim_start().to_string(),
                });
            }
        }
        Ok(Command::Ask { target: None, question: text.to_string() })
    }

    fn parse_ide(rest: &str) -> AgentResult<Command> {
        let words: Vec<&str> = rest.split_whitespace().collect();
        match words.as_slice() {
            ["status"] => Ok(Command::Status),
            ["learn", kind] => Ok(Command::Learn(kind_arg(kind, "Usage: /ide learn input|output")?)),
            ["learn", ..] => Err(AgentError::usage("Usage: /ide learn input|output")),
            ["calibrate", kind] => match *kind {
                "regions" => Ok(Command::Calibrate(CalibrateKind::Regions)),
                "input" => Ok(Command::Calibrate(CalibrateKind::Input)),
                "output" => Ok(Command::Calibrate(CalibrateKind::Output)),
                _ => Err(AgentError::usage("Usage: /ide calibrate regions|input|output")),
            },
            ["calibrate", ..] => Err(AgentError::usage("Usage: /ide calibrate regions|input|output")),
            ["debug", "screen"] => Ok(Command::DebugScreen),
            ["debug", "locate", kind] => Ok(Command::DebugLocate(kind_arg(kind, "Usage: /ide debug locate input|output")?)),
            ["debug", ..] => Err(AgentError::usage("Usage: /ide debug screen | /ide debug locate input|output")),
            _ => Err(AgentError::usage(
                "Usage: /ide status | /ide learn input|output | /ide calibrate regions|input|output | /ide debug screen | /ide debug locate input|output",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Command {
        Command::parse(text).unwrap()
    }

    #[test]
    fn parses_local_commands() {
        assert_eq!(parse("/pos"), Command::Position);
        assert_eq!(parse("  /pos "), Command::Position);
        assert_eq!(parse("/capture"), Command::Capture);
        assert_eq!(parse("WhoAmI"), Command::Whoami);
        assert_eq!(parse("/open chrome"), Command::Open("chrome".into()));
        assert_eq!(parse("/sh ls -la | head"), Command::Shell("ls -la | head".into()));
    }

    #[test]
    fn parses_ide_subcommands() {
        assert_eq!(parse("/ide status"), Command::Status);
        assert_eq!(parse("/ide learn input"), Command::Learn(FocusTarget::Input));
        assert_eq!(parse("/ide learn OUTPUT"), Command::Learn(FocusTarget::Transcript));
        assert_eq!(parse("/ide calibrate regions"), Command::Calibrate(CalibrateKind::Regions));
        assert_eq!(parse("/ide calibrate output"), Command::Calibrate(CalibrateKind::Output));
        assert_eq!(parse("/ide debug screen"), Command::DebugScreen);
        assert_eq!(parse("/ide debug locate output"), Command::DebugLocate(FocusTarget::Transcript));
    }

    #[test]
    fn malformed_commands_are_usage_errors() {
        for text in ["/open", "/open   ", "/sh", "/ide learn both", "/ide calibrate", "/ide debug locate x", "/ide"] {
            let err = Command::parse(text).unwrap_err();
            assert!(matches!(err, AgentError::Usage(_)), "{}", text);
            assert!(err.to_string().starts_with("Usage:"), "{}", text);
        }
    }

    #[test]
    fn routing_prefix_annotates_question() {
        assert_eq!(
            parse("@AG explain lifetimes"),
            Command::Ask { target: Some(ChatTarget::Antigravity), question: "explain lifetimes".into() }
        );
        assert_eq!(
            parse("@cursor   fix the build"),
            Command::Ask { target: Some(ChatTarget::Cursor), question: "fix the build".into() }
        );
    }

    #[test]
    fn everything_else_is_a_question() {
        assert_eq!(parse("/shrug"), Command::Ask { target: None, question: "/shrug".into() });
        assert_eq!(parse("@agent hi"), Command::Ask { target: None, question: "@agent hi".into() });
        assert_eq!(parse("whoami please"), Command::Ask { target: None, question: "whoami please".into() });
    }

    #[test]
    fn slash_commands_are_case_sensitive() {
        for text in ["/POS", "/Capture", "/SH ls", "/Open chrome", "/IDE status"] {
            assert_eq!(parse(text), Command::Ask { target: None, question: text.into() }, "{}", text);
        }
    }
}
