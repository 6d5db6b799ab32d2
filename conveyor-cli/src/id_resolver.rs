//! ID resolver module
//!
//! Resolves run ID prefixes to full UUIDs by listing runs, so users can type
//! short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use conveyor_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a run ID or prefix to a full UUID
///
/// If the input is already a full UUID, returns it immediately.
/// Otherwise, fetches all runs and finds the one matching the prefix.
///
/// # Errors
/// Returns an error if no run or more than one run matches the prefix, or if
/// the API call fails
pub async fn resolve_run_id(client: &OrchestratorClient, input: &str) -> Result<Uuid> {
    let id_or_prefix = IdOrPrefix::parse(input);
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let runs = client
        .list_runs()
        .await
        .context("Failed to fetch runs for ID resolution")?;

    match_prefix(runs.iter().map(|run| run.id), &id_or_prefix.to_string())
}

fn match_prefix(ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No run found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|id| id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    #[test]
    fn test_unique_prefix() {
        let ids = [
            id("1a2b3c4d-0000-0000-0000-000000000000"),
            id("9f8e7d6c-0000-0000-0000-000000000000"),
        ];
        assert_eq!(match_prefix(ids.into_iter(), "1a").unwrap(), ids[0]);
    }

    #[test]
    fn test_ambiguous_prefix() {
        let ids = [
            id("1a2b3c4d-0000-0000-0000-000000000000"),
            id("1a9e7d6c-0000-0000-0000-000000000000"),
        ];
        let err = match_prefix(ids.into_iter(), "1a").unwrap_err();
        assert!(err.to_string().contains("Ambiguous"));
    }

    #[test]
    fn test_no_match() {
        let ids = [id("1a2b3c4d-0000-0000-0000-000000000000")];
        assert!(match_prefix(ids.into_iter(), "ff").is_err());
    }
}
