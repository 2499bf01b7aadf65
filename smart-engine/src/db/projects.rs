//! Project, profile, label and training set persistence

use smart_common::db::{parse_uuid, Label, Profile, Project};
use smart_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Annotator permission on a project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Admin,
    Coder,
}

impl Permission {
    fn as_str(&self) -> &'static str {
        match self {
            Permission::Admin => "ADMIN",
            Permission::Coder => "CODER",
        }
    }
}

pub async fn create_profile(conn: &mut SqliteConnection, username: &str) -> Result<Profile> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO profiles (id, username) VALUES (?, ?)")
        .bind(id.to_string())
        .bind(username)
        .execute(conn)
        .await?;

    Ok(Profile {
        id,
        username: username.to_string(),
    })
}

/// Profile named `username`, created on first use
pub async fn get_or_create_profile(conn: &mut SqliteConnection, username: &str) -> Result<Profile> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM profiles WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;

    match existing {
        Some(id) => Ok(Profile {
            id: parse_uuid("profiles.id", &id)?,
            username: username.to_string(),
        }),
        None => create_profile(conn, username).await,
    }
}

/// Insert a project together with its first (current) training set
pub async fn insert_project(
    conn: &mut SqliteConnection,
    name: &str,
    description: Option<&str>,
    creator_id: Uuid,
    batch_size: u32,
) -> Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO projects (id, name, description, creator_id, batch_size, current_training_set)
        VALUES (?, ?, ?, ?, ?, 0)
        "#,
    )
    .bind(id.to_string())
    .bind(name)
    .bind(description)
    .bind(creator_id.to_string())
    .bind(i64::from(batch_size))
    .execute(&mut *conn)
    .await?;

    sqlx::query("INSERT INTO training_sets (project_id, set_number) VALUES (?, 0)")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(id)
}

pub async fn get_project(conn: &mut SqliteConnection, project_id: Uuid) -> Result<Project> {
    let row = sqlx::query(
        r#"
        SELECT id, name, description, creator_id, batch_size,
               current_training_set, training_in_progress
        FROM projects
        WHERE id = ?
        "#,
    )
    .bind(project_id.to_string())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| Error::NotFound(format!("project {}", project_id)))?;

    let id: String = row.get("id");
    let creator_id: String = row.get("creator_id");
    let batch_size: i64 = row.get("batch_size");

    Ok(Project {
        id: parse_uuid("projects.id", &id)?,
        name: row.get("name"),
        description: row.get("description"),
        creator_id: parse_uuid("projects.creator_id", &creator_id)?,
        batch_size: u32::try_from(batch_size).unwrap_or(u32::MAX),
        current_training_set: row.get("current_training_set"),
        training_in_progress: row.get::<i64, _>("training_in_progress") != 0,
    })
}

pub async fn insert_labels(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    names: &[String],
) -> Result<Vec<Label>> {
    let mut labels = Vec::with_capacity(names.len());

    for name in names {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO labels (id, project_id, name) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(project_id.to_string())
            .bind(name)
            .execute(&mut *conn)
            .await?;

        labels.push(Label {
            id,
            project_id,
            name: name.clone(),
        });
    }

    Ok(labels)
}

pub async fn list_labels(conn: &mut SqliteConnection, project_id: Uuid) -> Result<Vec<Label>> {
    let rows = sqlx::query("SELECT id, name FROM labels WHERE project_id = ? ORDER BY name")
        .bind(project_id.to_string())
        .fetch_all(conn)
        .await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.get("id");
            Ok(Label {
                id: parse_uuid("labels.id", &id)?,
                project_id,
                name: row.get("name"),
            })
        })
        .collect()
}

pub async fn add_permission(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    profile_id: Uuid,
    permission: Permission,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO project_permissions (project_id, profile_id, permission) VALUES (?, ?, ?)",
    )
    .bind(project_id.to_string())
    .bind(profile_id.to_string())
    .bind(permission.as_str())
    .execute(conn)
    .await?;

    Ok(())
}

/// Creator plus every profile holding a permission
pub async fn annotator_count(conn: &mut SqliteConnection, project_id: Uuid) -> Result<u32> {
    let permitted: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM project_permissions p
         JOIN projects pr ON pr.id = p.project_id
         WHERE p.project_id = ? AND p.profile_id != pr.creator_id",
    )
    .bind(project_id.to_string())
    .fetch_one(conn)
    .await?;

    Ok(u32::try_from(permitted).unwrap_or(u32::MAX).saturating_add(1))
}

/// Human-labeled items in `training_set`
pub async fn labeled_count(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    training_set: i64,
) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM data_labels l
         JOIN data d ON d.id = l.data_id
         WHERE d.project_id = ? AND l.training_set = ?",
    )
    .bind(project_id.to_string())
    .bind(training_set)
    .fetch_one(conn)
    .await?;

    Ok(count.max(0) as u64)
}

/// Move the current training set pointer from `expected` to `expected + 1`
///
/// Compare-and-swap: fails with `Error::Conflict` when the pointer is no
/// longer `expected`, so two completions for the same generation cannot both
/// advance it. Also releases the training slot.
pub async fn advance_training_set(
    pool: &SqlitePool,
    project_id: Uuid,
    expected: i64,
) -> Result<i64> {
    let next = expected + 1;
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE projects
        SET current_training_set = ?, training_in_progress = 0
        WHERE id = ? AND current_training_set = ?
        "#,
    )
    .bind(next)
    .bind(project_id.to_string())
    .bind(expected)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?)")
            .bind(project_id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        return Err(if exists {
            Error::Conflict(format!(
                "training set of project {} is no longer {}",
                project_id, expected
            ))
        } else {
            Error::NotFound(format!("project {}", project_id))
        });
    }

    sqlx::query("INSERT INTO training_sets (project_id, set_number) VALUES (?, ?)")
        .bind(project_id.to_string())
        .bind(next)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(%project_id, training_set = next, "Advanced current training set");
    Ok(next)
}
