//! Remote-execution agent calls against the compute gateway.

use crate::provider::{
    CommandApi, CommandInvocation, CommandStatus, ProviderFuture, SubmittedCommand,
};

use super::types::{CommandEnvelope, SubmitCommandRequest};
use super::{GatewayApiError, GatewayClient, HTTP_CLIENT};

impl GatewayClient {
    async fn submit_command_call(
        &self,
        instance_id: &str,
        command: &str,
        working_dir: &str,
    ) -> Result<SubmittedCommand, GatewayApiError> {
        let url = self.url(&format!("/instances/{instance_id}/commands"));
        let payload = SubmitCommandRequest {
            command: command.to_owned(),
            working_dir: working_dir.to_owned(),
        };
        let body = self.execute(HTTP_CLIENT.post(&url).json(&payload)).await?;
        let parsed: CommandEnvelope = Self::decode(&body)?;
        Ok(SubmittedCommand {
            command_id: parsed.command.id,
        })
    }

    async fn command_invocation_call(
        &self,
        instance_id: &str,
        command_id: &str,
    ) -> Result<CommandInvocation, GatewayApiError> {
        let url = self.url(&format!("/instances/{instance_id}/commands/{command_id}"));
        let body = self.execute(HTTP_CLIENT.get(&url)).await?;
        let parsed: CommandEnvelope = Self::decode(&body)?;
        Ok(CommandInvocation {
            status: CommandStatus::parse(&parsed.command.status),
            stdout: parsed.command.stdout,
            stderr: parsed.command.stderr,
        })
    }
}

impl CommandApi for GatewayClient {
    type Error = GatewayApiError;

    fn submit_command<'a>(
        &'a self,
        instance_id: &'a str,
        command: &'a str,
        working_dir: &'a str,
    ) -> ProviderFuture<'a, SubmittedCommand, Self::Error> {
        Box::pin(async move { self.submit_command_call(instance_id, command, working_dir).await })
    }

    fn command_invocation<'a>(
        &'a self,
        instance_id: &'a str,
        command_id: &'a str,
    ) -> ProviderFuture<'a, CommandInvocation, Self::Error> {
        Box::pin(async move { self.command_invocation_call(instance_id, command_id).await })
    }
}
