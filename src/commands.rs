//! Text commands
//! Parses the line-based commands the headless bridge reads from stdin.

use thiserror::Error;

use crate::core::controller::ControllerCommand;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,
    #[error("'club' needs a club code, e.g. 'club PT'")]
    MissingClub,
    #[error("Unknown command '{0}', try: start, stop, pause, resume, club <code>, quit")]
    Unknown(String),
}

/// Parses one line such as `start` or `club DR`. `quit` maps to shutdown.
pub fn parse_command(line: &str) -> Result<ControllerCommand, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(CommandError::Empty);
    };

    match verb.to_ascii_lowercase().as_str() {
        "start" | "connect" => Ok(ControllerCommand::Start),
        "stop" | "disconnect" => Ok(ControllerCommand::Stop),
        "pause" => Ok(ControllerCommand::Pause),
        "resume" => Ok(ControllerCommand::Resume),
        "club" => words
            .next()
            .map(|club| ControllerCommand::ClubSelected(club.to_ascii_uppercase()))
            .ok_or(CommandError::MissingClub),
        "quit" | "exit" | "shutdown" => Ok(ControllerCommand::Shutdown),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("start"), Ok(ControllerCommand::Start));
        assert_eq!(parse_command("  STOP "), Ok(ControllerCommand::Stop));
        assert_eq!(parse_command("pause"), Ok(ControllerCommand::Pause));
        assert_eq!(parse_command("resume"), Ok(ControllerCommand::Resume));
        assert_eq!(
            parse_command("club pt"),
            Ok(ControllerCommand::ClubSelected("PT".to_string()))
        );
        assert_eq!(parse_command("quit"), Ok(ControllerCommand::Shutdown));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_command("   "), Err(CommandError::Empty));
        assert_eq!(parse_command("club"), Err(CommandError::MissingClub));
        assert_eq!(
            parse_command("swing hard"),
            Err(CommandError::Unknown("swing".to_string()))
        );
    }
}
