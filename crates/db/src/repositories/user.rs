use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use approvo_core::domain::approval::UserId;
use approvo_core::ports::{CollaboratorError, DirectoryUser, UserDirectory};

use super::{format_timestamp, RepositoryError};
use crate::DbPool;

/// User directory backed by the `app_user` table.
#[derive(Clone)]
pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn find_users_by_role(&self, role: &str) -> Result<Vec<UserId>, CollaboratorError> {
        let mut conn = self.pool.acquire().await.map_err(directory_error)?;
        find_users_by_role(&mut conn, role).await.map_err(directory_error)
    }

    async fn get_user_role(&self, user_id: &UserId) -> Result<Option<String>, CollaboratorError> {
        let mut conn = self.pool.acquire().await.map_err(directory_error)?;
        find_role(&mut conn, user_id).await.map_err(directory_error)
    }
}

fn directory_error(error: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Directory(error.to_string())
}

pub async fn upsert_user(
    conn: &mut SqliteConnection,
    user: &DirectoryUser,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO app_user (id, name, role, is_active, created_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             role = excluded.role,
             is_active = excluded.is_active",
    )
    .bind(&user.id.0)
    .bind(&user.name)
    .bind(&user.role)
    .bind(user.is_active)
    .bind(format_timestamp(now))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Role of the user regardless of whether the account is still active.
pub async fn find_role(
    conn: &mut SqliteConnection,
    user_id: &UserId,
) -> Result<Option<String>, RepositoryError> {
    let row = sqlx::query("SELECT role FROM app_user WHERE id = ?")
        .bind(&user_id.0)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(match row {
        Some(row) => Some(row.try_get("role")?),
        None => None,
    })
}

pub async fn find_users_by_role(
    conn: &mut SqliteConnection,
    role: &str,
) -> Result<Vec<UserId>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id FROM app_user
         WHERE LOWER(TRIM(role)) = LOWER(TRIM(?)) AND is_active = 1
         ORDER BY id ASC",
    )
    .bind(role)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(|row| Ok(UserId(row.try_get("id")?))).collect()
}

pub async fn list_users(conn: &mut SqliteConnection) -> Result<Vec<DirectoryUser>, RepositoryError> {
    let rows = sqlx::query("SELECT id, name, role, is_active FROM app_user ORDER BY id ASC")
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(DirectoryUser {
                id: UserId(row.try_get("id")?),
                name: row.try_get("name")?,
                role: row.try_get("role")?,
                is_active: row.try_get("is_active")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use approvo_core::domain::approval::UserId;
    use approvo_core::ports::{DirectoryUser, UserDirectory};

    use super::{list_users, upsert_user, SqlUserDirectory};
    use crate::repositories::test_support::setup_pool;

    fn user(id: &str, role: &str, is_active: bool) -> DirectoryUser {
        DirectoryUser {
            id: UserId(id.to_owned()),
            name: id.to_uppercase(),
            role: role.to_owned(),
            is_active,
        }
    }

    #[tokio::test]
    async fn role_lookup_is_case_insensitive_and_skips_inactive_users() {
        let pool = setup_pool().await;
        {
            let mut conn = pool.acquire().await.expect("acquire");
            for entry in [
                user("u-fin", "Finance", true),
                user("u-fin-old", "finance", false),
                user("u-dir", "director", true),
            ] {
                upsert_user(&mut conn, &entry, Utc::now()).await.expect("upsert");
            }
        }

        let directory = SqlUserDirectory::new(pool.clone());
        assert_eq!(
            directory.find_users_by_role("FINANCE").await.expect("lookup"),
            vec![UserId("u-fin".to_owned())]
        );
        assert_eq!(
            directory.get_user_role(&UserId("u-fin-old".to_owned())).await.expect("role"),
            Some("finance".to_owned())
        );
        assert_eq!(directory.get_user_role(&UserId("nobody".to_owned())).await.expect("role"), None);

        let mut conn = pool.acquire().await.expect("acquire");
        assert_eq!(list_users(&mut conn).await.expect("list").len(), 3);
    }

    #[tokio::test]
    async fn upsert_replaces_role() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        upsert_user(&mut conn, &user("u-1", "employee", true), Utc::now()).await.expect("insert");
        upsert_user(&mut conn, &user("u-1", "manager", true), Utc::now()).await.expect("update");
        drop(conn);

        let directory = SqlUserDirectory::new(pool);
        assert_eq!(
            directory.get_user_role(&UserId("u-1".to_owned())).await.expect("role"),
            Some("manager".to_owned())
        );
    }
}
