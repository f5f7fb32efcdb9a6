use axum::extract::State;
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;

use crate::{
    error::Error,
    util::{FormattedDateTime, Json, ObjectIdString},
};

use super::auth::{Caller, UserAccess, UserCollection, UserModel, UserRole};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserSummary {
    pub id: ObjectIdString,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: FormattedDateTime,
}

impl From<UserModel> for UserSummary {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            email: value.email,
            role: value.role,
            created_at: value.created_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub users: Vec<UserSummary>,
}

/// Every account in the system, newest first. Admin only.
pub async fn index(
    State(users): State<UserCollection>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    match user.role {
        UserRole::Admin => {}
        UserRole::User | UserRole::Collector => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("account listing requested by non-admin"))
        }
    }

    let options = FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let mut cursor = users.find(bson::doc! {}, options).await?;

    let mut result = vec![];
    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(IndexResponse { users: result }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateRoleRequest {
    pub user_id: ObjectIdString,
    pub role: UserRole,
}

/// Promotes or demotes an account, e.g. onboarding a collector.
#[tracing::instrument(skip_all, fields(user = ?caller))]
pub async fn update_role(
    State(users): State<UserCollection>,
    caller: Caller,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<UserSummary>, Error> {
    caller.require_admin()?;

    let user = users
        .find_one_by_id(request.user_id.0)
        .await?
        .ok_or(Error::NoResource)?;

    users
        .update_one_by_id(
            user.id,
            bson::doc! { "$set": {
                "role": bson::to_bson(&request.role)?,
                "updated_at": bson::DateTime::from(OffsetDateTime::now_utc()),
            }},
        )
        .await?;

    tracing::debug!("changed role of {} to {:?}", user.id, request.role);

    Ok(Json(UserSummary {
        role: request.role,
        ..user.into()
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CollectorEntry {
    pub id: ObjectIdString,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: FormattedDateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CollectorsResponse {
    pub collectors: Vec<CollectorEntry>,
}

/// Directory of collector accounts, used when assigning requests.
pub async fn collectors(
    State(users): State<UserCollection>,
    user: UserAccess,
) -> Result<Json<CollectorsResponse>, Error> {
    match user.role {
        UserRole::Admin => {}
        UserRole::User | UserRole::Collector => return Err(Error::Forbidden),
    }

    let mut cursor = users
        .find(
            bson::doc! { "role": bson::to_bson(&UserRole::Collector)? },
            None,
        )
        .await?;

    let mut collectors = vec![];
    while cursor.advance().await? {
        let model = cursor.deserialize_current()?;

        collectors.push(CollectorEntry {
            id: model.id.into(),
            name: model.name,
            email: model.email,
            phone: model.phone,
            created_at: model.created_at.into(),
        });
    }

    Ok(Json(CollectorsResponse { collectors }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::{
        api::v1::{auth::UserRole, tests::bootstrap},
        error::Error,
        util::Json,
    };

    use super::UpdateRoleRequest;

    #[tokio::test]
    async fn test_index() {
        let bootstrap = bootstrap().await;
        let user = bootstrap.derive("u1@test.com", "password", UserRole::User).await;

        let Json(listing) = super::index(bootstrap.user_collection(), bootstrap.user_access())
            .await
            .unwrap();

        // the seeded admin plus the derived user
        assert_eq!(listing.users.len(), 2);

        let err = super::index(bootstrap.user_collection(), user.user_access())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Forbidden);
    }

    #[tokio::test]
    async fn test_update_role() {
        let bootstrap = bootstrap().await;
        let user = bootstrap.derive("u1@test.com", "password", UserRole::User).await;

        let Json(updated) = super::update_role(
            bootstrap.user_collection(),
            bootstrap.caller(),
            Json(UpdateRoleRequest {
                user_id: user.user_id().into(),
                role: UserRole::Collector,
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.role, UserRole::Collector);

        let model = bootstrap
            .user_collection()
            .0
            .find_one_by_id(user.user_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(model.role, UserRole::Collector);

        let err = super::update_role(
            bootstrap.user_collection(),
            bootstrap.caller(),
            Json(UpdateRoleRequest {
                user_id: bson::oid::ObjectId::new().into(),
                role: UserRole::Collector,
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::NoResource);

        let err = super::update_role(
            bootstrap.user_collection(),
            user.caller(),
            Json(UpdateRoleRequest {
                user_id: user.user_id().into(),
                role: UserRole::Admin,
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Forbidden);
    }

    #[tokio::test]
    async fn test_collectors() {
        let bootstrap = bootstrap().await;
        let _user = bootstrap.derive("u1@test.com", "password", UserRole::User).await;
        let collector = bootstrap
            .derive("c1@test.com", "password", UserRole::Collector)
            .await;

        let Json(listing) = super::collectors(bootstrap.user_collection(), bootstrap.user_access())
            .await
            .unwrap();

        assert_eq!(listing.collectors.len(), 1);
        assert_eq!(listing.collectors[0].id, collector.user_id());

        let err = super::collectors(bootstrap.user_collection(), collector.user_access())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Forbidden);
    }
}
