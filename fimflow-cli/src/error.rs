//! CLI error handling with stable exit codes.

use std::fmt;

/// Exit codes: 0 clean, 1 configuration error, 2 bind failure.
#[derive(Debug)]
pub enum CliError {
    /// Bad configuration or arguments.
    Config(String),
    /// The service could not bind its listen address.
    Bind(String),
    /// Anything else that stops the command.
    Runtime(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 1,
            CliError::Bind(_) => 2,
            CliError::Runtime(_) => 1,
        }
    }

    /// Prints the error and terminates with its exit code.
    pub fn exit(&self) -> ! {
        eprintln!("error: {self}");
        std::process::exit(self.exit_code());
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(message) => write!(f, "{message}"),
            CliError::Bind(message) => write!(f, "{message}"),
            CliError::Runtime(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for CliError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Config("bad".into()).exit_code(), 1);
        assert_eq!(CliError::Bind("taken".into()).exit_code(), 2);
        assert_eq!(CliError::Runtime("boom".into()).exit_code(), 1);
    }
}
