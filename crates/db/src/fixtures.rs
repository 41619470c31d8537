use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Canonical advisor roster for local development and smoke runs.
const SEED_ADVISORS: &[SeedAdvisorContract] = &[
    SeedAdvisorContract {
        id: "adv-seed-001",
        display_name: "Dana Al-Sabah",
        email: "dana.alsabah@consult.example",
        status: "active",
        rating: Some("4.9"),
    },
    SeedAdvisorContract {
        id: "adv-seed-002",
        display_name: "Omar Haddad",
        email: "omar.haddad@consult.example",
        status: "active",
        rating: Some("4.7"),
    },
    SeedAdvisorContract {
        id: "adv-seed-003",
        display_name: "Lina Rahman",
        email: "lina.rahman@consult.example",
        status: "active",
        rating: None,
    },
    SeedAdvisorContract {
        id: "adv-seed-004",
        display_name: "Yusuf Karim",
        email: "yusuf.karim@consult.example",
        status: "inactive",
        rating: Some("4.2"),
    },
];

/// Deterministic advisor fixtures. Loading is idempotent.
pub struct AdvisorSeedDataset;

impl AdvisorSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/advisor_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let advisors_seeded = SEED_ADVISORS
            .iter()
            .map(|advisor| AdvisorSeedInfo {
                advisor_id: advisor.id,
                display_name: advisor.display_name,
                active: advisor.status == "active",
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { advisors_seeded })
    }

    /// Verify that every seeded advisor exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for advisor in SEED_ADVISORS {
            let matches: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM consultants
                    WHERE id = ?1 AND display_name = ?2 AND email = ?3 AND status = ?4
                      AND rating IS ?5
                )",
            )
            .bind(advisor.id)
            .bind(advisor.display_name)
            .bind(advisor.email)
            .bind(advisor.status)
            .bind(advisor.rating)
            .fetch_one(pool)
            .await?;
            checks.push((advisor.id, matches == 1));
        }

        let quoted = sql_array_from_ids(&SEED_ADVISORS.iter().map(|a| a.id).collect::<Vec<_>>());
        let active: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM consultants WHERE status = 'active' AND id IN {quoted}"
        ))
        .fetch_one(pool)
        .await?;
        let expected_active =
            SEED_ADVISORS.iter().filter(|advisor| advisor.status == "active").count() as i64;
        checks.push(("active-advisor-count", active == expected_active));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove seeded advisors that no request references.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let quoted = sql_array_from_ids(&SEED_ADVISORS.iter().map(|a| a.id).collect::<Vec<_>>());
        sqlx::query(&format!(
            "DELETE FROM consultants
             WHERE id IN {quoted}
               AND id NOT IN (SELECT advisor_id FROM request_assignments)"
        ))
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedAdvisorContract {
    id: &'static str,
    display_name: &'static str,
    email: &'static str,
    status: &'static str,
    rating: Option<&'static str>,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub advisors_seeded: Vec<AdvisorSeedInfo>,
}

#[derive(Debug)]
pub struct AdvisorSeedInfo {
    pub advisor_id: &'static str,
    pub display_name: &'static str,
    pub active: bool,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{AdvisorRepository, SqlAdvisorRepository};
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!AdvisorSeedDataset::SQL.is_empty());
        for advisor in SEED_ADVISORS {
            assert!(AdvisorSeedDataset::SQL.contains(advisor.id), "{} missing", advisor.id);
        }
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = AdvisorSeedDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification =
            AdvisorSeedDataset::verify(&pool).await.expect("verify seed fixtures");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);
        assert_eq!(first.advisors_seeded.len(), 4);

        let second = AdvisorSeedDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification =
            AdvisorSeedDataset::verify(&pool).await.expect("re-verify seed fixtures");
        assert!(second_verification.all_present);
        assert_eq!(second.advisors_seeded.len(), 4);
        assert_eq!(first_verification.checks, second_verification.checks);
    }

    #[tokio::test]
    async fn seeded_roster_exposes_only_active_advisors() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");
        AdvisorSeedDataset::load(&pool).await.expect("load seed fixtures");

        let active = SqlAdvisorRepository::new(pool.clone()).list_active().await.expect("list");
        let ids: Vec<_> = active.iter().map(|advisor| advisor.id.0.as_str()).collect();
        assert_eq!(ids, vec!["adv-seed-001", "adv-seed-002", "adv-seed-003"]);

        AdvisorSeedDataset::clean(&pool).await.expect("clean");
        let verification = AdvisorSeedDataset::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
    }
}
