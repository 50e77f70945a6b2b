use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Executor, PgPool, Row};
use std::collections::HashMap;

use crate::users::{BOOTSTRAP_ADMIN, BOOTSTRAP_ADMIN_DESCRIPTION, BOOTSTRAP_ADMIN_PASSWORD};
use tracing::{error, info};

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.len() > 160 {
        format!("{}…", &trimmed[..160])
    } else {
        trimmed.to_string()
    }
}

static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202608071200_initial.sql",
        include_str!("../migrations/202608071200_initial.sql"),
    ),
    (
        "202608071210_record_indexes.sql",
        include_str!("../migrations/202608071210_record_indexes.sql"),
    ),
];

/// Apply pending migrations and seed the bootstrap admin. Idempotent and
/// safe to run on every process start; any failure here is fatal because
/// the application cannot operate without its schema.
pub async fn apply_migrations(pool: &PgPool) -> anyhow::Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version    TEXT PRIMARY KEY,\
           applied_at BIGINT NOT NULL,\
           checksum   TEXT NOT NULL\
         )",
    )
    .await?;

    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied: HashMap<String, String> = HashMap::new();
    for r in rows {
        if let (Ok(v), Ok(c)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
        ) {
            applied.insert(v, c);
        }
    }

    for (filename, raw_sql) in MIGRATIONS {
        let cleaned = raw_sql
            .lines()
            .filter(|line| {
                let t = line.trim_start();
                !(t.is_empty() || t.starts_with("--"))
            })
            .collect::<Vec<_>>()
            .join("\n");
        let checksum = format!("{:x}", Sha256::digest(cleaned.as_bytes()));

        if let Some(stored) = applied.get(*filename) {
            if stored != &checksum {
                anyhow::bail!("migration {} edited after application", filename);
            }
            info!(target: "pdireg", event = "migration_skip_file", file = %filename);
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            info!(target: "pdireg", event = "migration_stmt", file = %filename, sql = %preview(s));
            if let Err(e) = sqlx::query(s).execute(&mut *tx).await {
                error!(target: "pdireg", event = "migration_stmt_error", file = %filename, sql = %preview(s), error = %e);
                return Err(e.into());
            }
        }

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES ($1, $2, $3)",
        )
        .bind(*filename)
        .bind(Utc::now().timestamp_millis())
        .bind(&checksum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(target: "pdireg", event = "migration_file_applied", file = %filename);
    }

    ensure_bootstrap_admin(pool).await?;

    Ok(())
}

/// Keyed on the username primary key, so re-running never duplicates the
/// account and never resets a changed password.
async fn ensure_bootstrap_admin(pool: &PgPool) -> anyhow::Result<()> {
    let inserted = sqlx::query(
        "INSERT INTO users (username, password, role, description) \
         VALUES ($1, $2, 1, $3) \
         ON CONFLICT (username) DO NOTHING",
    )
    .bind(BOOTSTRAP_ADMIN)
    .bind(BOOTSTRAP_ADMIN_PASSWORD)
    .bind(BOOTSTRAP_ADMIN_DESCRIPTION)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted > 0 {
        info!(target: "pdireg", event = "bootstrap_admin_created", username = %BOOTSTRAP_ADMIN);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("SELECT 1;\n"), "SELECT 1;");
        let long = format!("SELECT '{}'", "x".repeat(200));
        let p = preview(&long);
        assert!(p.ends_with('…'));
        assert!(p.len() <= 164);
    }

    #[test]
    fn embedded_migrations_are_ordered_and_named() {
        let mut versions: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        let sorted = {
            let mut v = versions.clone();
            v.sort();
            v
        };
        assert_eq!(versions, sorted);
        versions.dedup();
        assert_eq!(versions.len(), MIGRATIONS.len());
    }

    #[test]
    fn checksums_ignore_comments_and_blank_lines() {
        let a = "-- comment\nCREATE TABLE t (id INT);\n";
        let b = "CREATE TABLE t (id INT);";
        let clean = |sql: &str| {
            sql.lines()
                .filter(|line| {
                    let t = line.trim_start();
                    !(t.is_empty() || t.starts_with("--"))
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(
            format!("{:x}", Sha256::digest(clean(a).as_bytes())),
            format!("{:x}", Sha256::digest(clean(b).as_bytes()))
        );
    }
}
