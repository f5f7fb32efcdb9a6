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
    mongo_ext::{is_duplicate_key, Collection},
    util::{FormattedDateTime, Json, ObjectIdString},
};

use super::{
    auth::{Caller, UserAccess, UserRole},
    request::{RequestCollection, RequestModel, RequestStatus},
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FeedbackModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub request_id: ObjectId,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: bson::DateTime,
}

#[derive(Clone)]
pub struct FeedbackCollection(pub Collection<FeedbackModel>);

impl std::ops::Deref for FeedbackCollection {
    type Target = Collection<FeedbackModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Feedback {
    pub id: ObjectIdString,
    pub request_id: ObjectIdString,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: FormattedDateTime,
}

impl From<FeedbackModel> for Feedback {
    fn from(value: FeedbackModel) -> Self {
        Self {
            id: value.id.into(),
            request_id: value.request_id.into(),
            rating: value.rating,
            comment: value.comment,
            created_at: value.created_at.into(),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct SubmitRequest {
    pub request_id: ObjectIdString,

    #[validate(range(min = 1, max = 5))]
    pub rating: i32,

    pub comment: Option<String>,
}

/// One-time rating by the request owner, only once the pickup is completed.
/// A unique index on `request_id` backs the in-handler existence check.
#[tracing::instrument(skip_all, fields(user = ?caller))]
pub async fn create(
    State(feedback): State<FeedbackCollection>,
    State(requests): State<RequestCollection>,
    caller: Caller,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Feedback>), Error> {
    caller.require_active()?;
    request.validate()?;

    let pickup = requests
        .find_one_by_id(request.request_id.0)
        .await?
        .ok_or(Error::NoResource)?;

    if pickup.user_id != caller.id {
        return Err(Error::Forbidden)
            .tap_err(|_| tracing::debug!("feedback attempted on someone else's request"));
    }

    if pickup.status != RequestStatus::Completed {
        return Err(Error::InvalidState("feedback requires a completed request"));
    }

    let existing = feedback
        .count_documents(bson::doc! { "request_id": pickup.id }, None)
        .await?;

    if existing > 0 {
        return Err(Error::Conflict("feedback already submitted for this request"));
    }

    let model = FeedbackModel {
        id: ObjectId::new(),
        request_id: pickup.id,
        rating: request.rating,
        comment: request.comment.filter(|it| !it.trim().is_empty()),
        created_at: OffsetDateTime::now_utc().into(),
    };

    if let Err(err) = feedback.insert_one(&model, None).await {
        if is_duplicate_key(&err) {
            return Err(Error::Conflict("feedback already submitted for this request"));
        }

        return Err(err.into());
    }

    Ok((StatusCode::CREATED, Json(model.into())))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestSummary {
    pub id: ObjectIdString,
    pub waste_type: String,
}

impl From<&RequestModel> for RequestSummary {
    fn from(value: &RequestModel) -> Self {
        Self {
            id: value.id.into(),
            waste_type: value.waste_type.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FeedbackWithRequest {
    #[serde(flatten)]
    pub feedback: Feedback,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSummary>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub feedback: Vec<FeedbackWithRequest>,
}

/// All submitted feedback with its request context. Admin only.
pub async fn index(
    State(feedback): State<FeedbackCollection>,
    State(requests): State<RequestCollection>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    match user.role {
        UserRole::Admin => {}
        UserRole::User | UserRole::Collector => return Err(Error::Forbidden),
    }

    let options = FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let mut cursor = feedback.find(bson::doc! {}, options).await?;

    let mut models = vec![];
    while cursor.advance().await? {
        models.push(cursor.deserialize_current()?);
    }

    let request_ids: Vec<_> = models.iter().map(|it: &FeedbackModel| it.request_id).collect();

    let mut joined = HashMap::new();
    if !request_ids.is_empty() {
        let mut cursor = requests
            .find(bson::doc! { "_id": { "$in": request_ids } }, None)
            .await?;

        while cursor.advance().await? {
            let request = cursor.deserialize_current()?;
            joined.insert(request.id, request);
        }
    }

    let feedback = models
        .into_iter()
        .map(|model| FeedbackWithRequest {
            request: joined.get(&model.request_id).map(Into::into),
            feedback: model.into(),
        })
        .collect();

    Ok(Json(IndexResponse { feedback }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::{
        api::v1::{
            auth::UserRole,
            request::{self, AssignRequest, CreateRequest, RequestStatus, UpdateRequest},
            tests::{bootstrap, Bootstrap},
        },
        error::Error,
        util::{Json, ObjectIdString},
    };

    use super::SubmitRequest;

    async fn create_request(bootstrap: &Bootstrap, owner: &Bootstrap) -> ObjectIdString {
        let (_, Json(created)) = request::create(
            bootstrap.request_collection(),
            owner.caller(),
            Json(CreateRequest {
                waste_type: "Recyclable".to_string(),
                pickup_address: "5 Oak Ave".to_string(),
                preferred_time: None,
                notes: None,
            }),
        )
        .await
        .unwrap();

        created.id
    }

    async fn complete_request(bootstrap: &Bootstrap, id: ObjectIdString, collector: &Bootstrap) {
        let _ = request::assign(
            bootstrap.request_collection(),
            bootstrap.user_collection(),
            bootstrap.caller(),
            Json(AssignRequest {
                request_id: id,
                collector_id: collector.user_id().into(),
            }),
        )
        .await
        .unwrap();

        for status in [RequestStatus::InProgress, RequestStatus::Completed] {
            let _ = request::update(
                bootstrap.request_collection(),
                bootstrap.user_collection(),
                collector.caller(),
                crate::util::PathObjectId(id.0),
                Json(UpdateRequest {
                    status: Some(status),
                    collector_id: None,
                }),
            )
            .await
            .unwrap();
        }
    }

    fn submit_body(request_id: ObjectIdString, rating: i32) -> Json<SubmitRequest> {
        Json(SubmitRequest {
            request_id,
            rating,
            comment: Some("quick and clean".to_string()),
        })
    }

    #[tokio::test]
    async fn test_submit_once() {
        let bootstrap = bootstrap().await;
        let owner = bootstrap.derive("u1@test.com", "password", UserRole::User).await;
        let collector = bootstrap
            .derive("c1@test.com", "password", UserRole::Collector)
            .await;

        let id = create_request(&bootstrap, &owner).await;
        complete_request(&bootstrap, id, &collector).await;

        let (status, Json(feedback)) = super::create(
            bootstrap.feedback_collection(),
            bootstrap.request_collection(),
            owner.caller(),
            submit_body(id, 5),
        )
        .await
        .unwrap();
        assert_eq!(status, axum::http::StatusCode::CREATED);
        assert_eq!(feedback.rating, 5);
        assert_eq!(feedback.request_id, id);

        let err = super::create(
            bootstrap.feedback_collection(),
            bootstrap.request_collection(),
            owner.caller(),
            submit_body(id, 4),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Conflict(..));
    }

    #[tokio::test]
    async fn test_requires_completed_request() {
        let bootstrap = bootstrap().await;
        let owner = bootstrap.derive("u1@test.com", "password", UserRole::User).await;

        let id = create_request(&bootstrap, &owner).await;

        let err = super::create(
            bootstrap.feedback_collection(),
            bootstrap.request_collection(),
            owner.caller(),
            submit_body(id, 5),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::InvalidState(..));
    }

    #[tokio::test]
    async fn test_owner_only() {
        let bootstrap = bootstrap().await;
        let owner = bootstrap.derive("u1@test.com", "password", UserRole::User).await;
        let stranger = bootstrap.derive("u2@test.com", "password", UserRole::User).await;
        let collector = bootstrap
            .derive("c1@test.com", "password", UserRole::Collector)
            .await;

        let id = create_request(&bootstrap, &owner).await;
        complete_request(&bootstrap, id, &collector).await;

        let err = super::create(
            bootstrap.feedback_collection(),
            bootstrap.request_collection(),
            stranger.caller(),
            submit_body(id, 5),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Forbidden);

        // the collector who did the pickup cannot rate it either
        let err = super::create(
            bootstrap.feedback_collection(),
            bootstrap.request_collection(),
            collector.caller(),
            submit_body(id, 5),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Forbidden);
    }

    #[tokio::test]
    async fn test_rating_bounds() {
        let bootstrap = bootstrap().await;
        let owner = bootstrap.derive("u1@test.com", "password", UserRole::User).await;
        let collector = bootstrap
            .derive("c1@test.com", "password", UserRole::Collector)
            .await;

        let id = create_request(&bootstrap, &owner).await;
        complete_request(&bootstrap, id, &collector).await;

        for rating in [0, 6, -1] {
            let err = super::create(
                bootstrap.feedback_collection(),
                bootstrap.request_collection(),
                owner.caller(),
                submit_body(id, rating),
            )
            .await
            .unwrap_err();
            assert_matches!(err, Error::ValidationError(..));
        }

        let err = super::create(
            bootstrap.feedback_collection(),
            bootstrap.request_collection(),
            owner.caller(),
            submit_body(bson::oid::ObjectId::new().into(), 3),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::NoResource);
    }

    #[tokio::test]
    async fn test_index_is_admin_only() {
        let bootstrap = bootstrap().await;
        let owner = bootstrap.derive("u1@test.com", "password", UserRole::User).await;
        let collector = bootstrap
            .derive("c1@test.com", "password", UserRole::Collector)
            .await;

        let id = create_request(&bootstrap, &owner).await;
        complete_request(&bootstrap, id, &collector).await;

        let _ = super::create(
            bootstrap.feedback_collection(),
            bootstrap.request_collection(),
            owner.caller(),
            submit_body(id, 4),
        )
        .await
        .unwrap();

        let Json(listing) = super::index(
            bootstrap.feedback_collection(),
            bootstrap.request_collection(),
            bootstrap.user_access(),
        )
        .await
        .unwrap();
        assert_eq!(listing.feedback.len(), 1);
        assert_eq!(listing.feedback[0].feedback.rating, 4);
        assert_matches!(&listing.feedback[0].request, Some(summary) => {
            assert_eq!(summary.waste_type, "Recyclable");
        });

        let err = super::index(
            bootstrap.feedback_collection(),
            bootstrap.request_collection(),
            owner.user_access(),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Forbidden);
    }
}
