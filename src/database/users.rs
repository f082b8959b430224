use sqlx::FromRow;

use crate::error::ServiceResult;
use crate::models::{Session, User};

use super::{to_u64, DatabaseConnection};

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    token: String,
}

impl DatabaseConnection {
    pub async fn create_user(&mut self, username: &str, token: &str) -> ServiceResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
                INSERT INTO app_user (username, token) VALUES ($1, $2)
                ON CONFLICT (username) DO UPDATE SET token = excluded.token
                RETURNING id, username, token
            "#,
        )
        .bind(username)
        .bind(token)
        .fetch_one(&mut *self.connection)
        .await?;

        Ok(User {
            id: to_u64(row.id),
            username: row.username,
        })
    }

    pub async fn get_session_by_token(&mut self, token: &str) -> ServiceResult<Option<Session>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, token FROM app_user WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&mut *self.connection)
        .await?;

        Ok(row.map(|row| Session {
            user: User {
                id: to_u64(row.id),
                username: row.username,
            },
            token: row.token,
        }))
    }
}
