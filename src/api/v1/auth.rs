use argon2::Argon2;
use axum::{
    extract::{FromRef, FromRequestParts, State},
    headers::{authorization::Bearer, Authorization, Cookie, Header, SetCookie},
    http::{request::Parts, HeaderValue},
    RequestPartsExt, TypedHeader,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::{Error, UnauthorizedType},
    mongo_ext::Collection,
    util::{hash_password, verify_password, FormattedDateTime, Json, ObjectIdString},
};

use super::token::{
    create_refresh_token, decode_access_token, decode_refresh_token, generate_access_token,
    JwtState, RefreshTokenClaims, RefreshTokenCollection,
};

#[derive(Clone)]
pub struct UserCollection(pub Collection<UserModel>);

impl std::ops::Deref for UserCollection {
    type Target = Collection<UserModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub password: String,
    pub role: UserRole,

    pub active: bool,
    pub banned: bool,
    pub ban_expires: Option<bson::DateTime>,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    #[default]
    User,
    Collector,
    Admin,
}

impl UserModel {
    pub fn is_banned(&self) -> bool {
        self.banned
            && self
                .ban_expires
                .map(|it| OffsetDateTime::from(it) > OffsetDateTime::now_utc())
                .unwrap_or(true)
    }

    pub async fn from_id(
        id: ObjectId,
        UserCollection(users): &UserCollection,
    ) -> Result<Self, Error> {
        users
            .find_one_by_id(id)
            .await?
            .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))
    }
}

/// Identity carried by the access token: enough for read-only visibility
/// checks without touching the database.
#[derive(Debug, Clone, Copy)]
pub struct UserAccess {
    pub id: ObjectId,
    pub role: UserRole,
}

impl UserAccess {
    pub fn from_token(jwt_state: &JwtState, token: &str) -> Result<Self, Error> {
        let token = decode_access_token(jwt_state, token)?;

        if token.claims.is_expired() {
            return Err(Error::Unauthorized(UnauthorizedType::InvalidAccessToken));
        }

        Ok(Self {
            id: token.claims.sub.0,
            role: token.claims.user_role,
        })
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserAccess
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;
    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, token.token())
    }
}

/// The resolved caller of a mutating operation: identity plus account
/// standing. A banned or deactivated account is treated the same as an
/// unauthenticated one.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub id: ObjectId,
    pub role: UserRole,
    pub active: bool,
    pub banned: bool,
}

impl Caller {
    pub fn from_model(model: &UserModel) -> Self {
        Self {
            id: model.id,
            role: model.role,
            active: model.active,
            banned: model.is_banned(),
        }
    }

    pub fn require_active(&self) -> Result<(), Error> {
        if !self.active || self.banned {
            return Err(Error::Unauthorized(UnauthorizedType::AccountDisabled))
                .tap_err(|_| tracing::debug!("disabled account attempted a mutating operation"));
        }

        Ok(())
    }

    pub fn require_admin(&self) -> Result<(), Error> {
        self.require_active()?;

        match self.role {
            UserRole::Admin => Ok(()),
            UserRole::User | UserRole::Collector => Err(Error::Forbidden),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    JwtState: FromRef<S>,
    UserCollection: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let access = parts.extract_with_state::<UserAccess, _>(state).await?;
        let users = UserCollection::from_ref(state);
        let model = UserModel::from_id(access.id, &users).await?;

        Ok(Self::from_model(&model))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserModel
where
    JwtState: FromRef<S>,
    UserCollection: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;
    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let access = parts.extract_with_state::<UserAccess, _>(state).await?;
        let users = UserCollection::from_ref(state);
        Self::from_id(access.id, &users).await
    }
}

#[derive(Debug)]
pub struct RefreshToken(String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RefreshToken {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let cookie = parts
            .extract::<TypedHeader<Cookie>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("cookie not found"))?;

        let refresh_token = cookie
            .get("refresh_token")
            .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("token not found"))?;

        Ok(Self(refresh_token.to_string()))
    }
}

#[derive(Debug)]
pub struct RefreshClaim(pub RefreshTokenClaims, pub String);

impl RefreshClaim {
    pub fn from_token(jwt_state: &JwtState, refresh_token: String) -> Result<Self, Error> {
        let token = decode_refresh_token(jwt_state, &refresh_token)
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

        if token.claims.is_expired() {
            return Err(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
                .tap_err(|_| tracing::debug!("expired refresh token"));
        }

        Ok(Self(token.claims, refresh_token))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RefreshClaim
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RefreshToken(refresh_token) = parts.extract::<RefreshToken>().await?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, refresh_token)
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    pub phone: Option<String>,
    pub address: Option<String>,

    #[validate(length(min = 8, max = 64))]
    pub password: String,

    #[validate(must_match = "password")]
    pub confirm_password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProfileResponse {
    pub id: ObjectIdString,

    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub role: UserRole,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<UserModel> for ProfileResponse {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            email: value.email,
            phone: value.phone,
            address: value.address,
            role: value.role,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

#[derive(Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    pub phone: Option<String>,
    pub address: Option<String>,

    #[validate(length(min = 8, max = 64))]
    pub password: String,

    #[validate(must_match = "password")]
    pub confirm_password: String,

    pub role: UserRole,
}

pub async fn create_user(
    users: UserCollection,
    argon: Argon2<'_>,
    request: CreateUserRequest,
) -> Result<UserModel, Error> {
    request.validate()?;

    let count = users
        .count_documents(bson::doc! { "email": &request.email }, None)
        .await?;

    if count > 0 {
        return Err(Error::MustUniqueError("email".to_string()));
    }

    if let Some(phone) = &request.phone {
        let count = users
            .count_documents(bson::doc! { "phone": phone }, None)
            .await?;

        if count > 0 {
            return Err(Error::MustUniqueError("phone".to_string()));
        }
    }

    let model = UserModel {
        id: ObjectId::new(),
        name: request.name,
        email: request.email,
        phone: request.phone,
        address: request.address,
        password: hash_password(&argon, &request.password)?,
        role: request.role,
        active: true,
        banned: false,
        ban_expires: None,
        created_at: OffsetDateTime::now_utc().into(),
        updated_at: OffsetDateTime::now_utc().into(),
    };
    users.insert_one(&model, None).await?;

    Ok(model)
}

pub async fn register(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'_>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<ProfileResponse>, Error> {
    create_user(
        users,
        argon,
        CreateUserRequest {
            name: request.name,
            email: request.email,
            phone: request.phone,
            address: request.address,
            password: request.password,
            confirm_password: request.confirm_password,
            role: UserRole::User,
        },
    )
    .await
    .map(|it| Json(it.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub refresh_token: String,
    pub access_token: String,
}

pub async fn login(
    State(users): State<UserCollection>,
    State(refresh_tokens): State<RefreshTokenCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    Json(request): Json<LoginRequest>,
) -> Result<(TypedHeader<SetCookie>, Json<LoginResponse>), Error> {
    let user = users
        .find_one(bson::doc! { "email": &request.email }, None)
        .await?;

    let user = match user {
        Some(user) if verify_password(&argon, &request.password, &user.password) => user,
        _ => {
            return Err(Error::Unauthorized(
                UnauthorizedType::WrongUsernameOrPassword,
            ))
        }
    };

    if !user.active || user.is_banned() {
        return Err(Error::Unauthorized(UnauthorizedType::AccountDisabled))
            .tap_err(|_| tracing::debug!("disabled account attempted login"));
    }

    let refresh_token = create_refresh_token(&jwt_state, &argon, refresh_tokens, &user).await?;
    let access_token = generate_access_token(&jwt_state, &user)?;

    let header = TypedHeader(
        SetCookie::decode(
            &mut [HeaderValue::from_str(&format!(
                "refresh_token={}; HttpOnly; Path=/",
                refresh_token
            ))
            .unwrap()]
            .as_slice()
            .iter(),
        )
        .unwrap(),
    );

    Ok((
        header,
        Json(LoginResponse {
            refresh_token,
            access_token: access_token.token,
        }),
    ))
}

pub async fn logout(
    State(refresh_tokens): State<RefreshTokenCollection>,
    RefreshClaim(claim, _): RefreshClaim,
) -> Result<(), Error> {
    let _m = refresh_tokens
        .find_one(bson::doc! { "_id": claim.sub }, None)
        .await?
        .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    refresh_tokens
        .delete_one(bson::doc! { "_id": claim.sub }, None)
        .await?;

    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshAccessTokenResponse {
    pub access_token: String,
    pub expired_at: FormattedDateTime,
}

pub async fn refresh_access_token(
    State(users): State<UserCollection>,
    State(refresh_tokens): State<RefreshTokenCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    RefreshClaim(claim, refresh_token): RefreshClaim,
) -> Result<Json<RefreshAccessTokenResponse>, Error> {
    let model = refresh_tokens
        .find_one(bson::doc! { "_id": claim.sub }, None)
        .await?
        .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    if !verify_password(&argon, &refresh_token, &model.token) {
        refresh_tokens
            .delete_one(bson::doc! { "_id": claim.sub }, None)
            .await?;

        return Err(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken));
    }

    let user = users
        .find_one(bson::doc! { "_id": claim.user_id }, None)
        .await?
        .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    let access_token = generate_access_token(&jwt_state, &user)?;

    Ok(Json(RefreshAccessTokenResponse {
        access_token: access_token.token,
        expired_at: access_token.expired_at.into(),
    }))
}

pub async fn profile(user: UserModel) -> Result<Json<ProfileResponse>, Error> {
    Ok(Json(user.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    pub phone: Option<String>,
    pub address: Option<String>,
}

#[tracing::instrument(skip_all, fields(user = %user.id))]
pub async fn update_profile(
    State(users): State<UserCollection>,
    user: UserModel,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, Error> {
    Caller::from_model(&user).require_active()?;

    let mut request = request;
    request.name = request.name.trim().to_string();
    request.phone = request.phone.map(|it| it.trim().to_string()).filter(|it| !it.is_empty());
    request.address = request
        .address
        .map(|it| it.trim().to_string())
        .filter(|it| !it.is_empty());
    request.validate()?;

    if let Some(phone) = &request.phone {
        if request.phone != user.phone {
            let count = users
                .count_documents(bson::doc! { "phone": phone }, None)
                .await?;

            if count > 0 {
                return Err(Error::MustUniqueError("phone".to_string()));
            }
        }
    }

    let updated = UserModel {
        name: request.name,
        phone: request.phone,
        address: request.address,
        updated_at: OffsetDateTime::now_utc().into(),
        ..user
    };

    users
        .update_one_by_id(updated.id, bson::doc! { "$set": bson::to_document(&updated)? })
        .await?;

    Ok(Json(updated.into()))
}

/// Removes the account and everything hanging off it in one transaction:
/// owned requests (and their feedback), refresh tokens, and the collector
/// binding on any request this user was assigned to. Those requests keep
/// their status.
#[tracing::instrument(skip_all, fields(user = ?caller))]
pub async fn delete_account(
    State(users): State<UserCollection>,
    State(requests): State<super::request::RequestCollection>,
    State(feedback): State<super::feedback::FeedbackCollection>,
    State(refresh_tokens): State<RefreshTokenCollection>,
    State(mongo): State<mongodb::Client>,
    caller: Caller,
) -> Result<(), Error> {
    caller.require_active()?;

    let mut session = mongo.start_session(None).await?;

    let transaction_options = mongodb::options::TransactionOptions::builder()
        .read_concern(mongodb::options::ReadConcern::snapshot())
        .write_concern(
            mongodb::options::WriteConcern::builder()
                .w(mongodb::options::Acknowledgment::Majority)
                .build(),
        )
        .selection_criteria(mongodb::options::SelectionCriteria::ReadPreference(
            mongodb::options::ReadPreference::Primary,
        ))
        .build();

    session.start_transaction(transaction_options).await?;

    let mut cursor = requests
        .find_with_session(bson::doc! { "user_id": caller.id }, None, &mut session)
        .await?;

    let mut owned_ids = vec![];
    while cursor.advance(&mut session).await? {
        owned_ids.push(cursor.deserialize_current()?.id);
    }

    if !owned_ids.is_empty() {
        feedback
            .delete_many_with_session(
                bson::doc! { "request_id": { "$in": owned_ids.clone() } },
                None,
                &mut session,
            )
            .await?;

        requests
            .delete_many_with_session(
                bson::doc! { "_id": { "$in": owned_ids } },
                None,
                &mut session,
            )
            .await?;
    }

    requests
        .update_many_with_session(
            bson::doc! { "collector_id": caller.id },
            bson::doc! { "$set": {
                "collector_id": bson::Bson::Null,
                "updated_at": bson::DateTime::from(OffsetDateTime::now_utc()),
            }},
            None,
            &mut session,
        )
        .await?;

    refresh_tokens
        .delete_many_with_session(bson::doc! { "user_id": caller.id }, None, &mut session)
        .await?;

    users
        .delete_one_with_session(bson::doc! { "_id": caller.id }, None, &mut session)
        .await?;

    session.commit_transaction().await?;

    tracing::debug!("account deleted");

    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use time::OffsetDateTime;

    use crate::{
        api::v1::{
            request::{RequestModel, RequestStatus},
            tests::bootstrap,
        },
        error::{Error, UnauthorizedType},
        util::Json,
    };

    use super::UserRole;

    #[tokio::test]
    async fn test_register_and_unique_email() {
        let bootstrap = bootstrap().await;

        let Json(profile) = super::register(
            bootstrap.user_collection(),
            bootstrap.argon(),
            Json(super::RegisterRequest {
                name: "name".to_string(),
                email: "email@test.com".to_string(),
                phone: Some("0800000001".to_string()),
                address: None,
                password: "password".to_string(),
                confirm_password: "password".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(profile.role, UserRole::User);

        let err = super::register(
            bootstrap.user_collection(),
            bootstrap.argon(),
            Json(super::RegisterRequest {
                name: "name".to_string(),
                email: "email@test.com".to_string(),
                phone: None,
                address: None,
                password: "password".to_string(),
                confirm_password: "password".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::MustUniqueError(field) if field == "email");
    }

    #[tokio::test]
    async fn test_login() {
        let bootstrap = bootstrap().await;

        let (_, Json(tokens)) = super::login(
            bootstrap.user_collection(),
            bootstrap.refresh_token_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            Json(super::LoginRequest {
                email: bootstrap.user_email(),
                password: bootstrap.user_password(),
            }),
        )
        .await
        .unwrap();

        let _ = super::refresh_access_token(
            bootstrap.user_collection(),
            bootstrap.refresh_token_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            super::RefreshClaim::from_token(
                &bootstrap.app_state.jwt_state,
                tokens.refresh_token.clone(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

        let err = super::login(
            bootstrap.user_collection(),
            bootstrap.refresh_token_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            Json(super::LoginRequest {
                email: bootstrap.user_email(),
                password: "wrongpassword".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(
            err,
            Error::Unauthorized(UnauthorizedType::WrongUsernameOrPassword)
        );
    }

    #[tokio::test]
    async fn test_login_banned_account() {
        let bootstrap = bootstrap().await;
        let banned = bootstrap
            .derive("banned@test.com", "password", UserRole::User)
            .await;

        bootstrap
            .app_state
            .user_collection
            .update_one_by_id(
                banned.user_id(),
                bson::doc! { "$set": { "banned": true, "ban_expires": bson::Bson::Null } },
            )
            .await
            .unwrap();

        let err = super::login(
            bootstrap.user_collection(),
            bootstrap.refresh_token_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            Json(super::LoginRequest {
                email: "banned@test.com".to_string(),
                password: "password".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Unauthorized(UnauthorizedType::AccountDisabled));
    }

    #[tokio::test]
    async fn test_logout() {
        let bootstrap = bootstrap().await;

        let (_, Json(tokens)) = super::login(
            bootstrap.user_collection(),
            bootstrap.refresh_token_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            Json(super::LoginRequest {
                email: bootstrap.user_email(),
                password: bootstrap.user_password(),
            }),
        )
        .await
        .unwrap();

        let claim = || {
            super::RefreshClaim::from_token(
                &bootstrap.app_state.jwt_state,
                tokens.refresh_token.clone(),
            )
            .unwrap()
        };

        super::logout(bootstrap.refresh_token_collection(), claim())
            .await
            .unwrap();

        let err = super::logout(bootstrap.refresh_token_collection(), claim())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Unauthorized(UnauthorizedType::InvalidRefreshToken)
        );
    }

    #[tokio::test]
    async fn test_update_profile() {
        let bootstrap = bootstrap().await;

        let Json(profile) = super::update_profile(
            bootstrap.user_collection(),
            bootstrap.user_model.clone(),
            Json(super::UpdateProfileRequest {
                name: "  Updated Name  ".to_string(),
                phone: Some(" 0800000002 ".to_string()),
                address: Some("".to_string()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(profile.name, "Updated Name");
        assert_eq!(profile.phone.as_deref(), Some("0800000002"));
        assert_eq!(profile.address, None);

        let err = super::update_profile(
            bootstrap.user_collection(),
            bootstrap.user_model.clone(),
            Json(super::UpdateProfileRequest {
                name: "   ".to_string(),
                phone: None,
                address: None,
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::ValidationError(..));
    }

    #[tokio::test]
    async fn test_delete_account_cascade() {
        let bootstrap = bootstrap().await;
        let owner = bootstrap.derive("owner@test.com", "password", UserRole::User).await;
        let other = bootstrap.derive("other@test.com", "password", UserRole::User).await;
        let collector = bootstrap
            .derive("collector@test.com", "password", UserRole::Collector)
            .await;

        let now = bson::DateTime::from(OffsetDateTime::now_utc());
        let owned = RequestModel {
            id: bson::oid::ObjectId::new(),
            user_id: owner.user_id(),
            collector_id: None,
            waste_type: "General Waste".to_string(),
            pickup_address: "12 Elm St".to_string(),
            preferred_time: None,
            notes: None,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let collected = RequestModel {
            id: bson::oid::ObjectId::new(),
            user_id: other.user_id(),
            collector_id: Some(owner.user_id()),
            waste_type: "Recyclables".to_string(),
            pickup_address: "3 Oak Ave".to_string(),
            preferred_time: None,
            notes: None,
            status: RequestStatus::InProgress,
            created_at: now,
            updated_at: now,
        };
        let _ = collector;

        bootstrap
            .app_state
            .request_collection
            .insert_one(&owned, None)
            .await
            .unwrap();
        bootstrap
            .app_state
            .request_collection
            .insert_one(&collected, None)
            .await
            .unwrap();

        super::delete_account(
            bootstrap.user_collection(),
            bootstrap.request_collection(),
            bootstrap.feedback_collection(),
            bootstrap.refresh_token_collection(),
            bootstrap.mongo(),
            owner.caller(),
        )
        .await
        .unwrap();

        let gone = bootstrap
            .app_state
            .request_collection
            .find_one_by_id(owned.id)
            .await
            .unwrap();
        assert!(gone.is_none());

        let kept = bootstrap
            .app_state
            .request_collection
            .find_one_by_id(collected.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.collector_id, None);
        assert_eq!(kept.status, RequestStatus::InProgress);

        let user = bootstrap
            .app_state
            .user_collection
            .find_one_by_id(owner.user_id())
            .await
            .unwrap();
        assert!(user.is_none());
    }
}
