use sqlx::PgPool;
use uuid::Uuid;

use crate::models::profiles::Profile;

#[derive(Clone)]
pub struct ProfileRepository {
    conn: PgPool,
}

impl ProfileRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }

    pub async fn insert_profile(&self, user_id: &str) -> Result<Profile, anyhow::Error> {
        let profile_id = Uuid::new_v4().hyphenated().to_string();

        let profile = sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO profiles (id, user_id, balance)
            VALUES ($1, $2, 0)
            RETURNING *
            "#,
        )
        .bind(&profile_id)
        .bind(user_id)
        .fetch_one(&self.conn)
        .await?;

        Ok(profile)
    }

    pub async fn get_profile_by_user_id(
        &self,
        user_id: &str,
    ) -> Result<Option<Profile>, anyhow::Error> {
        let profile =
            sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.conn)
                .await?;

        Ok(profile)
    }
}
