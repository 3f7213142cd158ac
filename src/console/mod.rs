//! Serial console command table

use crate::error::ConsoleError;

pub const PROMPT: &str = "> ";

const HELP: &[&str] = &[
    "Commands:",
    "  help              show this list",
    "  ls                list stored files and sizes",
    "  cat <file>        print a stored file",
    "  setprofile <n>    load profile n",
    "  status            active profile, loaded flag, idle animation",
    "  reboot            restart the device",
    "Upload: ###BEGIN### <file>, then the content, then ###END###",
];

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Ls,
    /// Absolute flash path
    Cat(String),
    SetProfile(u8),
    Status,
    Reboot,
}

impl Command {
    /// Parse one line. Verbs are case-insensitive; arguments are not.
    pub fn parse(line: &str, num_profiles: u8) -> Result<Self, ConsoleError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
        let arg = parts.next();

        match verb.as_str() {
            "help" | "?" => Ok(Command::Help),
            "ls" => Ok(Command::Ls),
            "cat" => {
                let file = arg.ok_or(ConsoleError::Usage("cat <file>"))?;
                Ok(Command::Cat(format!("/{}", file.trim_start_matches('/'))))
            }
            "setprofile" => {
                let given = arg.ok_or(ConsoleError::Usage("setprofile <n>"))?;
                match given.parse::<u8>() {
                    Ok(id) if (1..=num_profiles).contains(&id) => Ok(Command::SetProfile(id)),
                    _ => Err(ConsoleError::BadProfile {
                        given: given.to_string(),
                        max: num_profiles,
                    }),
                }
            }
            "status" => Ok(Command::Status),
            "reboot" => Ok(Command::Reboot),
            _ => Err(ConsoleError::UnknownCommand(line.trim().to_string())),
        }
    }
}

pub fn help_lines() -> &'static [&'static str] {
    HELP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("HELP", 5), Ok(Command::Help));
        assert_eq!(Command::parse("ls", 5), Ok(Command::Ls));
        assert_eq!(
            Command::parse("cat profile1.json", 5),
            Ok(Command::Cat("/profile1.json".to_string()))
        );
        assert_eq!(
            Command::parse("Cat /backups/a.bak", 5),
            Ok(Command::Cat("/backups/a.bak".to_string()))
        );
        assert_eq!(Command::parse("SetProfile 3", 5), Ok(Command::SetProfile(3)));
        assert_eq!(Command::parse("status", 5), Ok(Command::Status));
        assert_eq!(Command::parse("reboot", 5), Ok(Command::Reboot));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Command::parse("cat", 5), Err(ConsoleError::Usage("cat <file>")));
        assert_eq!(
            Command::parse("setprofile 6", 5),
            Err(ConsoleError::BadProfile {
                given: "6".to_string(),
                max: 5
            })
        );
        assert!(matches!(
            Command::parse("setprofile x", 5),
            Err(ConsoleError::BadProfile { .. })
        ));
        assert_eq!(
            Command::parse("format c:", 5),
            Err(ConsoleError::UnknownCommand("format c:".to_string()))
        );
    }
}
