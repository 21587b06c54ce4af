use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::profiles::Profile;
use crate::repositories::profiles::ProfileRepository;

pub enum ProfileRequest {
    CreateProfile {
        user_id: String,
        response: oneshot::Sender<Result<Profile, ServiceError>>,
    },
    GetProfile {
        user_id: String,
        response: oneshot::Sender<Result<Option<Profile>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct ProfileRequestHandler {
    repository: ProfileRepository,
}

impl ProfileRequestHandler {
    pub fn new(sql_conn: PgPool) -> Self {
        let repository = ProfileRepository::new(sql_conn);

        ProfileRequestHandler { repository }
    }

    async fn create_profile(&self, user_id: &str) -> Result<Profile, ServiceError> {
        self.repository
            .insert_profile(user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, ServiceError> {
        self.repository
            .get_profile_by_user_id(user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))
    }
}

#[async_trait]
impl RequestHandler<ProfileRequest> for ProfileRequestHandler {
    async fn handle_request(&self, request: ProfileRequest) {
        match request {
            ProfileRequest::CreateProfile { user_id, response } => {
                let profile = self.create_profile(&user_id).await;
                let _ = response.send(profile);
            }
            ProfileRequest::GetProfile { user_id, response } => {
                let profile = self.get_profile(&user_id).await;
                let _ = response.send(profile);
            }
        }
    }
}

pub struct ProfileService;

impl ProfileService {
    pub fn new() -> Self {
        ProfileService {}
    }
}

#[async_trait]
impl Service<ProfileRequest, ProfileRequestHandler> for ProfileService {}
