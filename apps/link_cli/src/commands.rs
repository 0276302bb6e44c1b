//! User intents typed on stdin.

use shared::domain::InstitutionId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Consent,
    Search(String),
    Pick(InstitutionId),
    Featured,
    ManualEntry,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("empty input")]
    Empty,
    #[error("`pick` needs an institution id")]
    MissingInstitution,
    #[error("unknown command `{0}`; type `help`")]
    Unknown(String),
}

pub const HELP: &str = "\
commands:
  consent          accept the data access consent
  featured         load featured institutions
  search <text>    search institutions (empty text clears the results)
  pick <id>        pick an institution by id
  manual           enter account details manually (when the session allows it)
  status           print the current pane
  quit";

pub fn parse_command(line: &str) -> Result<UserCommand, CommandParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (verb, rest) = match line.trim_start().split_once(' ') {
        Some((verb, rest)) => (verb, rest),
        None => (line.trim(), ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "" => Err(CommandParseError::Empty),
        "consent" => Ok(UserCommand::Consent),
        // The query is kept verbatim, including inner and trailing spaces.
        "search" => Ok(UserCommand::Search(rest.to_string())),
        "pick" => {
            let id = rest.trim();
            if id.is_empty() {
                Err(CommandParseError::MissingInstitution)
            } else {
                Ok(UserCommand::Pick(InstitutionId::new(id)))
            }
        }
        "featured" => Ok(UserCommand::Featured),
        "manual" => Ok(UserCommand::ManualEntry),
        "status" => Ok(UserCommand::Status),
        "help" | "?" => Ok(UserCommand::Help),
        "quit" | "exit" => Ok(UserCommand::Quit),
        other => Err(CommandParseError::Unknown(other.to_string())),
    }
}
