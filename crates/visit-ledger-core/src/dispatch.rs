use serde::{Deserialize, Serialize};

use crate::{
    append_record, reconstruct_history, register_subject, Clock, LedgerError, LedgerStore,
    Subject,
};

/// One routed invocation of the ledger index, parsed from a function name
/// and positional string arguments.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LedgerCommand {
    RegisterSubject { subject_id: String, profile: Vec<u8> },
    AppendRecord { subject_id: String, payload: Vec<u8> },
    ReconstructHistory { subject_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandOutput {
    Registered { subject: Subject },
    Appended { subject_id: String, record_key: String },
    History { subject_id: String, report: String },
}

impl LedgerCommand {
    pub const REGISTER_SUBJECT: &'static str = "registerSubject";
    pub const APPEND_RECORD: &'static str = "appendRecord";
    pub const RECONSTRUCT_HISTORY: &'static str = "reconstructHistory";

    /// Route `function` to a command, checking arity and identifier.
    ///
    /// # Errors
    /// Returns [`LedgerError::InvalidArgument`] for an unknown function name,
    /// the wrong number of arguments, or an empty subject identifier.
    pub fn parse(function: &str, args: &[String]) -> Result<Self, LedgerError> {
        let command = match (function, args) {
            (Self::REGISTER_SUBJECT, [subject_id, profile]) => Self::RegisterSubject {
                subject_id: subject_id.clone(),
                profile: profile.clone().into_bytes(),
            },
            (Self::APPEND_RECORD, [subject_id, payload]) => Self::AppendRecord {
                subject_id: subject_id.clone(),
                payload: payload.clone().into_bytes(),
            },
            (Self::RECONSTRUCT_HISTORY, [subject_id]) => {
                Self::ReconstructHistory { subject_id: subject_id.clone() }
            }
            (Self::REGISTER_SUBJECT | Self::APPEND_RECORD, _) => {
                return Err(arity_error(function, 2, args.len()));
            }
            (Self::RECONSTRUCT_HISTORY, _) => return Err(arity_error(function, 1, args.len())),
            _ => {
                return Err(LedgerError::InvalidArgument(format!(
                    "unknown function `{function}`; expected one of {}, {}, {}",
                    Self::REGISTER_SUBJECT,
                    Self::APPEND_RECORD,
                    Self::RECONSTRUCT_HISTORY
                )));
            }
        };

        crate::require_subject_id(command.subject_id())?;
        Ok(command)
    }

    #[must_use]
    pub fn subject_id(&self) -> &str {
        match self {
            Self::RegisterSubject { subject_id, .. }
            | Self::AppendRecord { subject_id, .. }
            | Self::ReconstructHistory { subject_id } => subject_id,
        }
    }

    #[must_use]
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::RegisterSubject { .. } => Self::REGISTER_SUBJECT,
            Self::AppendRecord { .. } => Self::APPEND_RECORD,
            Self::ReconstructHistory { .. } => Self::RECONSTRUCT_HISTORY,
        }
    }

    /// Run the command against `store`.
    ///
    /// # Errors
    /// Propagates the [`LedgerError`] of the routed operation unchanged.
    pub fn execute<S, C>(self, store: &mut S, clock: &C) -> Result<CommandOutput, LedgerError>
    where
        S: LedgerStore + ?Sized,
        C: Clock + ?Sized,
    {
        tracing::debug!(function = self.function_name(), subject_id = self.subject_id(), "dispatching");
        match self {
            Self::RegisterSubject { subject_id, profile } => {
                let subject = register_subject(store, &subject_id, &profile)?;
                Ok(CommandOutput::Registered { subject })
            }
            Self::AppendRecord { subject_id, payload } => {
                let record_key = append_record(store, clock, &subject_id, &payload)?;
                Ok(CommandOutput::Appended { subject_id, record_key })
            }
            Self::ReconstructHistory { subject_id } => {
                let report = reconstruct_history(&*store, &subject_id)?;
                Ok(CommandOutput::History { subject_id, report })
            }
        }
    }
}

fn arity_error(function: &str, expected: usize, actual: usize) -> LedgerError {
    LedgerError::InvalidArgument(format!(
        "incorrect number of arguments for `{function}`: expected {expected}, got {actual}"
    ))
}
