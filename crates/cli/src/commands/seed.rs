use approvo_db::{DemoSeed, SeedResult};

use crate::commands::{run_with_pool, CommandResult};

pub fn run() -> CommandResult {
    let result = run_with_pool("seed", |_config, pool| async move {
        let seed_result = DemoSeed::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeed::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        if !verification.ok {
            return Err(("seed_verification", verification_message(&verification.missing), 6u8));
        }
        Ok(seed_result)
    });

    match result {
        Ok(seed_result) => CommandResult::success("seed", seed_message(&seed_result)),
        Err(failure) => failure,
    }
}

fn seed_message(result: &SeedResult) -> String {
    let users = DemoSeed::user_ids().into_iter().map(|id| id.0).collect::<Vec<_>>().join(", ");
    let workflows = DemoSeed::workflows()
        .iter()
        .map(|workflow| format!("  - {}: {} ({} steps)", workflow.id.0, workflow.name, workflow.steps.len()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "demo directory ready ({} users: {users}); approval workflows:\n{workflows}",
        result.users
    )
}

fn verification_message(missing: &[String]) -> String {
    if missing.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for: {}", missing.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use approvo_db::SeedResult;

    use super::{seed_message, verification_message};

    #[test]
    fn verification_message_lists_missing_items() {
        let missing = vec!["user u-finance".to_string(), "workflow wf-sales-standard".to_string()];

        assert_eq!(
            verification_message(&missing),
            "Seed verification failed for: user u-finance, workflow wf-sales-standard"
        );
    }

    #[test]
    fn verification_message_falls_back_to_generic_when_nothing_is_named() {
        assert_eq!(verification_message(&[]), "Some seed data failed to load");
    }

    #[test]
    fn seed_message_does_not_depend_on_how_many_rows_were_new() {
        let first = seed_message(&SeedResult { users: 5, workflows_created: 3 });
        let again = seed_message(&SeedResult { users: 5, workflows_created: 0 });

        assert_eq!(first, again);
        assert!(first.contains("  - wf-purchase-large: Purchase above 5.000.000 (3 steps)"));
    }
}
