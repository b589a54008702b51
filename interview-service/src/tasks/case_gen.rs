//! On-demand case generation for classification triples with no stored case.

use anyhow::Context as _;
use rand::Rng;
use rig::completion::Prompt;
use tracing::info;

use crate::catalog;
use crate::llm::{LlmConfig, authoring_agent, clean_json_reply};
use crate::models::{Archetype, BodyRegion, Case};
use crate::prompts::{case_generation_system_prompt, case_generation_user_prompt};
use crate::store::{CaseRepository, StoreResult};

/// Ask the model for a complete case matching the requested triple. The ids
/// in the reply are forced back to the request so routing never drifts from
/// what the student selected.
pub async fn generate_case(
    llm: &LlmConfig,
    archetype: &Archetype,
    region: &BodyRegion,
    category_id: &str,
) -> anyhow::Result<Case> {
    let category_label = catalog::category_label(region, category_id);

    let system = case_generation_system_prompt(archetype, &archetype.id, &region.id, category_id);
    let user = case_generation_user_prompt(archetype, &region.label, &category_label);

    let agent = authoring_agent(llm, &system);
    let raw = agent
        .prompt(&user)
        .await
        .context("case generation call failed")?;

    let mut case: Case = serde_json::from_str(clean_json_reply(&raw))
        .context("generated case was not valid JSON")?;

    case.archetype_id = archetype.id.clone();
    case.region_id = region.id.clone();
    case.category_id = category_id.to_string();

    anyhow::ensure!(!case.id.trim().is_empty(), "generated case has no id");
    anyhow::ensure!(!case.title.trim().is_empty(), "generated case has no title");
    anyhow::ensure!(
        !case.initial_complaint.trim().is_empty(),
        "generated case has no initial complaint"
    );
    anyhow::ensure!(
        !case.true_diagnosis.trim().is_empty(),
        "generated case has no diagnosis"
    );

    info!(case_id = %case.id, title = %case.title, "Generated dynamic case");
    Ok(case)
}

/// Resolve an id collision by suffixing a random number. Best-effort
/// uniqueness only: two concurrent generations can still race to the same
/// suffixed id, so the subsequent persist is an upsert rather than an append.
pub async fn assign_unique_id(repo: &CaseRepository, case: &mut Case) -> StoreResult<()> {
    if repo.exists(&case.id).await? {
        let suffixed = format!("{}_{}", case.id, rand::rng().random_range(0..1000));
        info!(original = %case.id, suffixed = %suffixed, "Case id already taken, suffixing");
        case.id = suffixed;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::builtin_cases;

    #[tokio::test]
    async fn colliding_id_gets_a_numeric_suffix() {
        let repo = CaseRepository::new(None);
        let taken = builtin_cases()[0].id.clone();

        let mut case = builtin_cases()[0].clone();
        assign_unique_id(&repo, &mut case).await.unwrap();

        assert_ne!(case.id, taken);
        let suffix = case.id.strip_prefix(&format!("{taken}_")).unwrap();
        assert!(suffix.parse::<u32>().is_ok());
    }

    #[tokio::test]
    async fn fresh_id_is_left_alone() {
        let repo = CaseRepository::new(None);
        let mut case = builtin_cases()[0].clone();
        case.id = "gen_totally_new".to_string();
        assign_unique_id(&repo, &mut case).await.unwrap();
        assert_eq!(case.id, "gen_totally_new");
    }
}
