use axum::extract::FromRef;

use crate::{
    api::v1::{
        auth::UserCollection,
        feedback::FeedbackCollection,
        request::RequestCollection,
        token::{JwtState, RefreshTokenCollection},
    },
    migrate::MigrationCollection,
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub argon: argon2::Argon2<'static>,
    pub jwt_state: JwtState,

    pub mongo_client: mongodb::Client,
    pub migrate_collection: MigrationCollection,
    pub token_collection: RefreshTokenCollection,
    pub user_collection: UserCollection,
    pub request_collection: RequestCollection,
    pub feedback_collection: FeedbackCollection,
}

impl AppState {
    pub async fn new(
        mongo_url: &str,
        database_name: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let argon = argon2::Argon2::default();
        let jwt_state = JwtState::new_from_env();

        let mongo_client_opt = mongodb::options::ClientOptions::parse(mongo_url).await?;
        let mongo_client = mongodb::Client::with_options(mongo_client_opt)?;

        let db = mongo_client.database(database_name);
        Ok(Self {
            argon,
            jwt_state,

            mongo_client,
            migrate_collection: MigrationCollection(db.collection("migrations").into()),
            token_collection: RefreshTokenCollection(db.collection("refresh_tokens")),
            user_collection: UserCollection(db.collection("users").into()),
            request_collection: RequestCollection(db.collection("requests").into()),
            feedback_collection: FeedbackCollection(db.collection("feedback").into()),
        })
    }

    pub async fn new_from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mongodb_url = &std::env::var("MONGODB_URI")
            .expect("Cannot retreive MONGODB_URI from environment variable.");

        Self::new(mongodb_url, "wastepickup").await
    }
}
