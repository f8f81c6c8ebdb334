//! Shared validation for task-creation payloads, used by both the REST
//! `POST /tasks` handler and the MCP-facing stricter constructor (§6's
//! Ambient addendum).

use delegator_db::models::WorkerModel;

use crate::error::CoreError;

const IDENTIFIER_MIN_LEN: usize = 1;
const IDENTIFIER_MAX_LEN: usize = 100;
const STANDARD_EXECUTION_PROMPT_MIN_LEN: usize = 10;
const STANDARD_SYSTEM_PROMPT_MAX_LEN: usize = 1000;
const MCP_SYSTEM_PROMPT_MIN_LEN: usize = 75;
const MCP_SYSTEM_PROMPT_MAX_LEN: usize = 500;
const MCP_EXECUTION_PROMPT_MIN_LEN: usize = 150;
const MAX_INITIAL_DELAY: f64 = 3600.0;

/// A validated set of fields ready to become a [`delegator_db::queries::tasks::NewTask`].
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub working_directory: String,
    pub system_prompt: String,
    pub execution_prompt: String,
    pub model: WorkerModel,
    pub identifier: Option<String>,
    pub depends_on: Vec<String>,
    pub initial_delay: Option<f64>,
}

/// The human-facing `POST /tasks` body, pre-validation.
#[derive(Debug, Clone)]
pub struct TaskCreate {
    pub working_directory: String,
    pub system_prompt: Option<String>,
    pub execution_prompt: String,
    pub model: Option<WorkerModel>,
    pub identifier: Option<String>,
    pub depends_on: Vec<String>,
    pub initial_delay: Option<f64>,
}

/// The stricter machine-facing payload used by MCP-style integrations.
#[derive(Debug, Clone)]
pub struct MCPCreateTaskPayload {
    pub working_directory: String,
    pub system_prompt: String,
    pub execution_prompt: String,
    pub model: Option<WorkerModel>,
    pub identifier: Option<String>,
    pub depends_on: Vec<String>,
    pub initial_delay: Option<f64>,
}

impl TaskSpec {
    /// Validate a human-facing `TaskCreate` body.
    pub fn from_task_create(body: TaskCreate) -> Result<Self, CoreError> {
        if body.working_directory.trim().is_empty() {
            return Err(CoreError::ValidationFailure(
                "working_directory must not be empty".into(),
            ));
        }
        if body.execution_prompt.chars().count() < STANDARD_EXECUTION_PROMPT_MIN_LEN {
            return Err(CoreError::ValidationFailure(format!(
                "execution_prompt must be at least {STANDARD_EXECUTION_PROMPT_MIN_LEN} characters"
            )));
        }
        let system_prompt = body.system_prompt.unwrap_or_default();
        if system_prompt.chars().count() > STANDARD_SYSTEM_PROMPT_MAX_LEN {
            return Err(CoreError::ValidationFailure(format!(
                "system_prompt must be at most {STANDARD_SYSTEM_PROMPT_MAX_LEN} characters"
            )));
        }

        validate_identifier(body.identifier.as_deref())?;
        validate_initial_delay(body.initial_delay)?;
        validate_no_self_reference(body.identifier.as_deref(), &body.depends_on)?;

        Ok(Self {
            working_directory: body.working_directory,
            system_prompt,
            execution_prompt: body.execution_prompt,
            model: body.model.unwrap_or_default(),
            identifier: body.identifier,
            depends_on: body.depends_on,
            initial_delay: body.initial_delay,
        })
    }

    /// Validate the stricter machine-facing payload.
    pub fn from_mcp_payload(body: MCPCreateTaskPayload) -> Result<Self, CoreError> {
        if body.working_directory.trim().is_empty() {
            return Err(CoreError::ValidationFailure(
                "working_directory must not be empty".into(),
            ));
        }

        let system_len = body.system_prompt.chars().count();
        if !(MCP_SYSTEM_PROMPT_MIN_LEN..=MCP_SYSTEM_PROMPT_MAX_LEN).contains(&system_len) {
            return Err(CoreError::ValidationFailure(format!(
                "system_prompt must be between {MCP_SYSTEM_PROMPT_MIN_LEN} and {MCP_SYSTEM_PROMPT_MAX_LEN} characters"
            )));
        }

        if body.execution_prompt.chars().count() < MCP_EXECUTION_PROMPT_MIN_LEN {
            return Err(CoreError::ValidationFailure(format!(
                "execution_prompt must be at least {MCP_EXECUTION_PROMPT_MIN_LEN} characters"
            )));
        }
        if !body.execution_prompt.contains('/') && !body.execution_prompt.contains('\\') {
            return Err(CoreError::ValidationFailure(
                "execution_prompt must contain a path-like substring".into(),
            ));
        }

        validate_identifier(body.identifier.as_deref())?;
        validate_initial_delay(body.initial_delay)?;
        validate_no_self_reference(body.identifier.as_deref(), &body.depends_on)?;

        Ok(Self {
            working_directory: body.working_directory,
            system_prompt: body.system_prompt,
            execution_prompt: body.execution_prompt,
            model: body.model.unwrap_or_default(),
            identifier: body.identifier,
            depends_on: body.depends_on,
            initial_delay: body.initial_delay,
        })
    }
}

fn validate_identifier(identifier: Option<&str>) -> Result<(), CoreError> {
    let Some(identifier) = identifier else {
        return Ok(());
    };
    let len = identifier.chars().count();
    if !(IDENTIFIER_MIN_LEN..=IDENTIFIER_MAX_LEN).contains(&len) {
        return Err(CoreError::ValidationFailure(format!(
            "identifier must be between {IDENTIFIER_MIN_LEN} and {IDENTIFIER_MAX_LEN} characters"
        )));
    }
    if !identifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::ValidationFailure(
            "identifier must match ^[A-Za-z0-9_-]+$".into(),
        ));
    }
    Ok(())
}

fn validate_initial_delay(initial_delay: Option<f64>) -> Result<(), CoreError> {
    match initial_delay {
        Some(delay) if !(0.0..=MAX_INITIAL_DELAY).contains(&delay) => Err(
            CoreError::ValidationFailure(format!("initial_delay must be between 0 and {MAX_INITIAL_DELAY}")),
        ),
        _ => Ok(()),
    }
}

fn validate_no_self_reference(identifier: Option<&str>, depends_on: &[String]) -> Result<(), CoreError> {
    if let Some(identifier) = identifier {
        if depends_on.iter().any(|dep| dep == identifier) {
            return Err(CoreError::ValidationFailure(
                "a task cannot depend on itself".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_create() -> TaskCreate {
        TaskCreate {
            working_directory: "/tmp".into(),
            system_prompt: None,
            execution_prompt: "do the thing please".into(),
            model: None,
            identifier: None,
            depends_on: vec![],
            initial_delay: None,
        }
    }

    #[test]
    fn accepts_minimal_valid_create() {
        let spec = TaskSpec::from_task_create(basic_create()).unwrap();
        assert_eq!(spec.model, WorkerModel::Sonnet);
    }

    #[test]
    fn rejects_short_execution_prompt() {
        let mut body = basic_create();
        body.execution_prompt = "short".into();
        assert!(TaskSpec::from_task_create(body).is_err());
    }

    #[test]
    fn rejects_oversized_system_prompt() {
        let mut body = basic_create();
        body.system_prompt = Some("x".repeat(1001));
        assert!(TaskSpec::from_task_create(body).is_err());
    }

    #[test]
    fn rejects_invalid_identifier_characters() {
        let mut body = basic_create();
        body.identifier = Some("not a valid id!".into());
        assert!(TaskSpec::from_task_create(body).is_err());
    }

    #[test]
    fn rejects_out_of_range_initial_delay() {
        let mut body = basic_create();
        body.initial_delay = Some(3601.0);
        assert!(TaskSpec::from_task_create(body).is_err());
    }

    #[test]
    fn rejects_self_referential_dependency() {
        let mut body = basic_create();
        body.identifier = Some("a".into());
        body.depends_on = vec!["a".into()];
        assert!(TaskSpec::from_task_create(body).is_err());
    }

    fn basic_mcp() -> MCPCreateTaskPayload {
        MCPCreateTaskPayload {
            working_directory: "/tmp".into(),
            system_prompt: "s".repeat(100),
            execution_prompt: format!("{}/some/path", "x".repeat(150)),
            model: None,
            identifier: None,
            depends_on: vec![],
            initial_delay: None,
        }
    }

    #[test]
    fn mcp_accepts_valid_payload() {
        assert!(TaskSpec::from_mcp_payload(basic_mcp()).is_ok());
    }

    #[test]
    fn mcp_rejects_short_system_prompt() {
        let mut body = basic_mcp();
        body.system_prompt = "too short".into();
        assert!(TaskSpec::from_mcp_payload(body).is_err());
    }

    #[test]
    fn mcp_rejects_execution_prompt_without_path() {
        let mut body = basic_mcp();
        body.execution_prompt = "x".repeat(200);
        assert!(TaskSpec::from_mcp_payload(body).is_err());
    }
}
