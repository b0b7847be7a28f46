//! Operator input parsing.
//!
//! Once joined, every line the operator enters is either a single-character
//! command or chat text. Commands are case sensitive (`c` and `C` differ).

/// What a line of operator input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// `q`: leave the chat.
    Quit,
    /// `c`: toggle suppressed display.
    ToggleSuppressed,
    /// `C`: clear history here and announce it to everyone.
    ClearHistory,
    /// `-`: take back the operator's most recent message.
    Redact,
    /// `m`: drop a divider into the local history.
    Mark,
    /// `u`: cycle when the terminal gets alerted.
    CycleUrgency,
    /// `h`: list the commands.
    Help,
    /// Empty line: redraw everything.
    Refresh,
    Chat(String),
}

pub const HELP_TEXT: &str = "commands: q quit | c toggle quiet display | C clear history \
                             | - redact last message | m mark | u cycle alerts | h help";

impl OperatorCommand {
    pub fn parse(line: &str) -> Self {
        match line {
            "" => OperatorCommand::Refresh,
            "q" => OperatorCommand::Quit,
            "c" => OperatorCommand::ToggleSuppressed,
            "C" => OperatorCommand::ClearHistory,
            "-" => OperatorCommand::Redact,
            "m" => OperatorCommand::Mark,
            "u" => OperatorCommand::CycleUrgency,
            "h" => OperatorCommand::Help,
            text => OperatorCommand::Chat(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_characters_map_to_commands() {
        assert_eq!(OperatorCommand::parse("q"), OperatorCommand::Quit);
        assert_eq!(OperatorCommand::parse("c"), OperatorCommand::ToggleSuppressed);
        assert_eq!(OperatorCommand::parse("C"), OperatorCommand::ClearHistory);
        assert_eq!(OperatorCommand::parse("-"), OperatorCommand::Redact);
        assert_eq!(OperatorCommand::parse("m"), OperatorCommand::Mark);
        assert_eq!(OperatorCommand::parse("u"), OperatorCommand::CycleUrgency);
        assert_eq!(OperatorCommand::parse("h"), OperatorCommand::Help);
    }

    #[test]
    fn empty_line_refreshes() {
        assert_eq!(OperatorCommand::parse(""), OperatorCommand::Refresh);
    }

    #[test]
    fn everything_else_is_chat() {
        assert!(matches!(OperatorCommand::parse("x"), OperatorCommand::Chat(text) if text == "x"));
        assert!(matches!(OperatorCommand::parse("Q"), OperatorCommand::Chat(text) if text == "Q"));
        assert!(matches!(OperatorCommand::parse(" q"), OperatorCommand::Chat(text) if text == " q"));
        assert!(matches!(
            OperatorCommand::parse("quit"),
            OperatorCommand::Chat(text) if text == "quit"
        ));
    }
}
