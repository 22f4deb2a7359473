//! `agentrace execution` subcommands.

use anyhow::Result;

use super::ExecutionCommand;
use super::output::{print_execution, print_json};
use crate::state::AppState;

pub async fn handle_execution_command(cmd: ExecutionCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ExecutionCommand::Show { id } => {
            let execution = state.orchestrator.get_execution(&id).await?;
            if json {
                print_json(&execution)?;
            } else {
                print_execution(&execution);
            }
            Ok(())
        }
    }
}
