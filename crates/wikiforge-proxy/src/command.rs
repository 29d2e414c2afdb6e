//! Typed execution of external control commands.
//!
//! Callers get a structured outcome (spawn failure vs. nonzero exit with
//! captured stderr) instead of string-matching process output.

use std::fmt;

use tokio::process::Command;

#[derive(Debug)]
pub enum CommandError {
    /// The program could not be spawned at all.
    Spawn(String),
    /// The program ran and exited nonzero.
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(msg) => write!(f, "failed to spawn {msg}"),
            Self::Failed {
                program,
                code,
                stderr,
            } => match code {
                Some(code) => write!(f, "{program} exited {code}: {stderr}"),
                None => write!(f, "{program} killed by signal: {stderr}"),
            },
        }
    }
}

impl std::error::Error for CommandError {}

/// Run `argv` to completion and report success solely by exit status.
pub async fn run(argv: &[String]) -> Result<(), CommandError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CommandError::Spawn("empty command".to_string()))?;

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| CommandError::Spawn(format!("{program}: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(CommandError::Failed {
            program: program.clone(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command() {
        assert!(run(&["true".to_string()]).await.is_ok());
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let err = run(&["false".to_string()]).await.unwrap_err();
        match err {
            CommandError::Failed { code, .. } => assert_eq!(code, Some(1)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run(&["definitely-not-a-real-binary-7f3a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn(_)));
    }

    #[tokio::test]
    async fn empty_argv_is_a_spawn_error() {
        assert!(matches!(run(&[]).await, Err(CommandError::Spawn(_))));
    }
}
