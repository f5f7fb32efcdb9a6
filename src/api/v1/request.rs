use std::collections::HashMap;

use axum::{extract::State, http::StatusCode};
use bson::oid::ObjectId;
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{FormattedDateTime, Json, ObjectIdString, PathObjectId},
};

use super::auth::{Caller, UserAccess, UserCollection, UserModel, UserRole};

/// Lifecycle of a pickup request. `Pending` is the initial state,
/// `Completed` and `Cancelled` are terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// The single transition the assigned collector may take from this
    /// state. Everything else belongs to the admin.
    pub fn collector_next(self) -> Option<RequestStatus> {
        match self {
            Self::Assigned => Some(Self::InProgress),
            Self::InProgress => Some(Self::Completed),
            Self::Pending | Self::Completed | Self::Cancelled => None,
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };

        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub collector_id: Option<ObjectId>,

    pub waste_type: String,
    pub pickup_address: String,
    pub preferred_time: Option<bson::DateTime>,
    pub notes: Option<String>,
    pub status: RequestStatus,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl RequestModel {
    /// Visibility is limited to the owner, the assigned collector and
    /// admins. Collectors do not see each other's jobs.
    pub fn viewable_by(&self, access: &UserAccess) -> bool {
        match access.role {
            UserRole::Admin => true,
            UserRole::User | UserRole::Collector => {
                self.user_id == access.id || self.collector_id == Some(access.id)
            }
        }
    }
}

#[derive(Clone)]
pub struct RequestCollection(pub Collection<RequestModel>);

impl std::ops::Deref for RequestCollection {
    type Target = Collection<RequestModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PickupRequest {
    pub id: ObjectIdString,
    pub user_id: ObjectIdString,
    pub collector_id: Option<ObjectIdString>,

    pub waste_type: String,
    pub pickup_address: String,
    pub preferred_time: Option<FormattedDateTime>,
    pub notes: Option<String>,
    pub status: RequestStatus,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<RequestModel> for PickupRequest {
    fn from(value: RequestModel) -> Self {
        Self {
            id: value.id.into(),
            user_id: value.user_id.into(),
            collector_id: value.collector_id.map(Into::into),

            waste_type: value.waste_type,
            pickup_address: value.pickup_address,
            preferred_time: value.preferred_time.map(Into::into),
            notes: value.notes,
            status: value.status,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

/// Owner contact details exposed to the assigned collector and admins.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OwnerSummary {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl From<&UserModel> for OwnerSummary {
    fn from(value: &UserModel) -> Self {
        Self {
            name: value.name.clone(),
            email: value.email.clone(),
            phone: value.phone.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CollectorSummary {
    pub id: ObjectIdString,
    pub name: String,
    pub email: String,
}

impl From<&UserModel> for CollectorSummary {
    fn from(value: &UserModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name.clone(),
            email: value.email.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: PickupRequest,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<OwnerSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collector: Option<CollectorSummary>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub requests: Vec<RequestDetail>,
}

async fn find_sorted(
    requests: &RequestCollection,
    filter: bson::Document,
) -> Result<Vec<RequestModel>, Error> {
    let options = FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let mut cursor = requests.find(filter, options).await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?);
    }

    Ok(result)
}

async fn load_users(
    users: &UserCollection,
    ids: Vec<ObjectId>,
) -> Result<HashMap<ObjectId, UserModel>, Error> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut cursor = users.find(bson::doc! { "_id": { "$in": ids } }, None).await?;

    let mut map = HashMap::new();

    while cursor.advance().await? {
        let user = cursor.deserialize_current()?;
        map.insert(user.id, user);
    }

    Ok(map)
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct CreateRequest {
    #[validate(length(min = 1, max = 100))]
    pub waste_type: String,

    #[validate(length(min = 1))]
    pub pickup_address: String,

    pub preferred_time: Option<FormattedDateTime>,
    pub notes: Option<String>,
}

#[tracing::instrument(skip_all, fields(user = ?caller))]
pub async fn create(
    State(requests): State<RequestCollection>,
    caller: Caller,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<PickupRequest>), Error> {
    caller.require_active()?;

    let mut request = request;
    request.waste_type = request.waste_type.trim().to_string();
    request.pickup_address = request.pickup_address.trim().to_string();
    request.validate()?;

    let model = RequestModel {
        id: ObjectId::new(),
        user_id: caller.id,
        collector_id: None,

        waste_type: request.waste_type,
        pickup_address: request.pickup_address,
        preferred_time: request.preferred_time.map(Into::into),
        notes: request.notes.filter(|it| !it.trim().is_empty()),
        status: RequestStatus::Pending,

        created_at: OffsetDateTime::now_utc().into(),
        updated_at: OffsetDateTime::now_utc().into(),
    };

    tracing::debug!("creating pickup request {:?}", model.id);
    requests.insert_one(&model, None).await?;

    Ok((StatusCode::CREATED, Json(model.into())))
}

/// The caller's own requests, newest first, with the assigned collector
/// attached where there is one.
pub async fn index(
    State(requests): State<RequestCollection>,
    State(users): State<UserCollection>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    let models = find_sorted(&requests, bson::doc! { "user_id": user.id }).await?;

    let collector_ids = models.iter().filter_map(|it| it.collector_id).collect();
    let collectors = load_users(&users, collector_ids).await?;

    let requests = models
        .into_iter()
        .map(|model| RequestDetail {
            user: None,
            collector: model
                .collector_id
                .and_then(|id| collectors.get(&id))
                .map(Into::into),
            request: model.into(),
        })
        .collect();

    Ok(Json(IndexResponse { requests }))
}

/// Jobs assigned to the calling collector, with the customer's contact
/// details.
pub async fn index_collector(
    State(requests): State<RequestCollection>,
    State(users): State<UserCollection>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    match user.role {
        UserRole::Collector => {}
        UserRole::User | UserRole::Admin => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("collector listing requested by non-collector"))
        }
    }

    let models = find_sorted(&requests, bson::doc! { "collector_id": user.id }).await?;

    let owner_ids = models.iter().map(|it| it.user_id).collect();
    let owners = load_users(&users, owner_ids).await?;

    let requests = models
        .into_iter()
        .map(|model| RequestDetail {
            user: owners.get(&model.user_id).map(Into::into),
            collector: None,
            request: model.into(),
        })
        .collect();

    Ok(Json(IndexResponse { requests }))
}

pub async fn show(
    State(requests): State<RequestCollection>,
    State(users): State<UserCollection>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
) -> Result<Json<RequestDetail>, Error> {
    let model = requests.find_one_by_id(id).await?.ok_or(Error::NoResource)?;

    if !model.viewable_by(&user) {
        return Err(Error::Forbidden)
            .tap_err(|_| tracing::debug!("tried viewing someone else's request"));
    }

    let owner = users.find_one_by_id(model.user_id).await?;
    let collector = match model.collector_id {
        Some(collector_id) => users.find_one_by_id(collector_id).await?,
        None => None,
    };

    Ok(Json(RequestDetail {
        user: owner.as_ref().map(Into::into),
        collector: collector.as_ref().map(Into::into),
        request: model.into(),
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateRequest {
    pub status: Option<RequestStatus>,
    pub collector_id: Option<ObjectIdString>,
}

/// Status (and, for admins, collector) changes. Admins may move a request
/// anywhere; the assigned collector may only take the one legal next step.
/// The write is conditioned on the status we read, so racing updates
/// surface as a conflict instead of overwriting each other.
#[tracing::instrument(skip_all, fields(id = %id, user = ?caller))]
pub async fn update(
    State(requests): State<RequestCollection>,
    State(users): State<UserCollection>,
    caller: Caller,
    PathObjectId(id): PathObjectId,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<PickupRequest>, Error> {
    caller.require_active()?;

    let current = requests.find_one_by_id(id).await?.ok_or(Error::NoResource)?;

    let (status, collector_id) = match caller.role {
        UserRole::Admin => {
            let status = request.status.unwrap_or(current.status);

            let collector_id = match &request.collector_id {
                Some(collector_id) => {
                    let target = users
                        .find_one_by_id(collector_id.0)
                        .await?
                        .ok_or(Error::NoResource)?;

                    if target.role != UserRole::Collector {
                        return Err(Error::NotACollector).tap_err(|_| {
                            tracing::debug!("tried assigning a non-collector account")
                        });
                    }

                    Some(target.id)
                }
                None => current.collector_id,
            };

            // a pending request never carries a collector, and an assigned
            // or in-progress request always does
            let collector_id = match status {
                RequestStatus::Pending => None,
                _ => collector_id,
            };

            if collector_id.is_none()
                && matches!(status, RequestStatus::Assigned | RequestStatus::InProgress)
            {
                return Err(Error::validation("collector_id", "required"));
            }

            (status, collector_id)
        }
        UserRole::Collector if current.collector_id == Some(caller.id) => {
            if request.collector_id.is_some() {
                return Err(Error::Forbidden)
                    .tap_err(|_| tracing::debug!("collector tried changing the assignment"));
            }

            let to = request
                .status
                .ok_or_else(|| Error::validation("status", "required"))?;

            match current.status.collector_next() {
                Some(next) if next == to => {}
                _ => {
                    return Err(Error::InvalidTransition {
                        from: current.status,
                        to,
                    })
                }
            }

            (to, current.collector_id)
        }
        UserRole::User | UserRole::Collector => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried updating a request without permission"))
        }
    };

    let updated = requests
        .update_one_guarded(
            id,
            bson::doc! { "status": bson::to_bson(&current.status)? },
            bson::doc! { "$set": {
                "status": bson::to_bson(&status)?,
                "collector_id": collector_id,
                "updated_at": bson::DateTime::from(OffsetDateTime::now_utc()),
            }},
        )
        .await?
        .ok_or(Error::Conflict("request changed concurrently"))?;

    Ok(Json(updated.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssignRequest {
    pub request_id: ObjectIdString,
    pub collector_id: ObjectIdString,
}

/// Binds a collector to a request and moves it to `assigned`. Reassignment
/// overwrites the previous collector; no history is kept.
#[tracing::instrument(skip_all, fields(user = ?caller))]
pub async fn assign(
    State(requests): State<RequestCollection>,
    State(users): State<UserCollection>,
    caller: Caller,
    Json(request): Json<AssignRequest>,
) -> Result<Json<PickupRequest>, Error> {
    caller.require_admin()?;

    let current = requests
        .find_one_by_id(request.request_id.0)
        .await?
        .ok_or(Error::NoResource)?;

    let target = users
        .find_one_by_id(request.collector_id.0)
        .await?
        .ok_or(Error::NoResource)?;

    if target.role != UserRole::Collector {
        return Err(Error::NotACollector)
            .tap_err(|_| tracing::debug!("assignment target is not a collector"));
    }

    let updated = requests
        .update_one_guarded(
            current.id,
            bson::doc! { "status": bson::to_bson(&current.status)? },
            bson::doc! { "$set": {
                "collector_id": target.id,
                "status": bson::to_bson(&RequestStatus::Assigned)?,
                "updated_at": bson::DateTime::from(OffsetDateTime::now_utc()),
            }},
        )
        .await?
        .ok_or(Error::Conflict("request changed concurrently"))?;

    tracing::debug!("assigned collector {} to request {}", target.id, current.id);

    Ok(Json(updated.into()))
}

/// Every request in the system with owner and collector context. Admin only.
pub async fn index_all(
    State(requests): State<RequestCollection>,
    State(users): State<UserCollection>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    match user.role {
        UserRole::Admin => {}
        UserRole::User | UserRole::Collector => return Err(Error::Forbidden),
    }

    let models = find_sorted(&requests, bson::doc! {}).await?;

    let user_ids = models
        .iter()
        .flat_map(|it| [Some(it.user_id), it.collector_id])
        .flatten()
        .collect();
    let joined = load_users(&users, user_ids).await?;

    let requests = models
        .into_iter()
        .map(|model| RequestDetail {
            user: joined.get(&model.user_id).map(Into::into),
            collector: model
                .collector_id
                .and_then(|id| joined.get(&id))
                .map(Into::into),
            request: model.into(),
        })
        .collect();

    Ok(Json(IndexResponse { requests }))
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsResponse {
    pub total: u64,
    pub pending: u64,
    pub assigned: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub cancelled: u64,
}

#[derive(Deserialize)]
struct StatusCount {
    #[serde(rename = "_id")]
    status: RequestStatus,
    count: u64,
}

pub async fn stats(
    State(requests): State<RequestCollection>,
    user: UserAccess,
) -> Result<Json<StatsResponse>, Error> {
    match user.role {
        UserRole::Admin => {}
        UserRole::User | UserRole::Collector => return Err(Error::Forbidden),
    }

    let mut cursor = requests
        .aggregate(
            [bson::doc! { "$group": { "_id": "$status", "count": { "$sum": 1 } } }],
            None,
        )
        .await?
        .with_type::<StatusCount>();

    let mut stats = StatsResponse::default();

    while cursor.advance().await? {
        let entry = cursor.deserialize_current()?;

        stats.total += entry.count;
        match entry.status {
            RequestStatus::Pending => stats.pending += entry.count,
            RequestStatus::Assigned => stats.assigned += entry.count,
            RequestStatus::InProgress => stats.in_progress += entry.count,
            RequestStatus::Completed => stats.completed += entry.count,
            RequestStatus::Cancelled => stats.cancelled += entry.count,
        }
    }

    Ok(Json(stats))
}
