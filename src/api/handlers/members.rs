//! Member and subscription administration.
//!
//! Flow Overview:
//! 1) Stage B admits `/members` routes with a grant on `members` and the
//!    nested `/members/:id/subscriptions` routes with a grant on
//!    `subscriptions`.
//! 2) An `Own` grant narrows reads and writes to records the caller created;
//!    records whose creator was deleted need a `Full` grant.
//! 3) Subscription routes answer 404 for an unknown member before anything
//!    else; a member is always created together with its first subscription.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::{internal_error, normalize_email, reject, require_full, respond, valid_email};
use crate::{
    api::AppState,
    auth::{AccessLevel, AuthError, Authorized},
    store::{EnrolledMember, Member, MemberProfile, Plan, Subscription, SubscriptionTerms},
};

const MEMBERS: &str = "members";
const SUBSCRIPTIONS: &str = "subscriptions";

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionRequest {
    pub plan: Plan,
    pub starts_on: NaiveDate,
    pub active: bool,
    pub price_cents: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateSubscriptionRequest {
    pub plan: Option<Plan>,
    pub starts_on: Option<NaiveDate>,
    pub active: Option<bool>,
    pub price_cents: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateMemberRequest {
    pub name: String,
    pub surname: String,
    pub gender: String,
    pub date_of_birth: NaiveDate,
    pub phone: String,
    pub email: Option<String>,
    pub country: String,
    pub city: String,
    pub street: String,
    /// First subscription, required on enrollment.
    pub subscription: SubscriptionRequest,
}

/// Partial update; an empty `email` clears it.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateMemberRequest {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
}

fn denied(authorized: &Authorized, resource: &str) -> Response {
    AuthError::PermissionDenied {
        resource: resource.to_string(),
        action: authorized.grant.action,
    }
    .into_response()
}

/// Whether the grant reaches a record created by `created_by`.
fn reachable(
    authorized: &Authorized,
    resource: &str,
    created_by: Option<i64>,
) -> Result<(), Response> {
    match created_by {
        Some(owner) if authorized.covers(owner) => Ok(()),
        Some(_) => Err(denied(authorized, resource)),
        None => require_full(authorized, resource),
    }
}

/// `created_by` filter applied to listings.
fn owner_filter(authorized: &Authorized) -> Option<i64> {
    (authorized.grant.level == AccessLevel::Own).then(|| authorized.principal().id)
}

fn member_not_found(id: i64) -> Response {
    reject(StatusCode::NOT_FOUND, format!("member {id} not found"))
}

fn subscription_not_found(id: i64) -> Response {
    reject(StatusCode::NOT_FOUND, format!("subscription {id} not found"))
}

fn clean_email(email: Option<String>) -> Option<String> {
    email
        .map(|email| normalize_email(&email))
        .filter(|email| !email.is_empty())
}

fn trimmed_profile(mut profile: MemberProfile) -> MemberProfile {
    for field in [
        &mut profile.name,
        &mut profile.surname,
        &mut profile.gender,
        &mut profile.phone,
        &mut profile.country,
        &mut profile.city,
        &mut profile.street,
    ] {
        *field = field.trim().to_string();
    }
    profile.email = clean_email(profile.email);
    profile
}

fn validate_profile(profile: &MemberProfile, today: NaiveDate) -> Result<(), &'static str> {
    let required = [
        &profile.name,
        &profile.surname,
        &profile.gender,
        &profile.phone,
        &profile.country,
        &profile.city,
        &profile.street,
    ];
    if required.iter().any(|field| field.is_empty()) {
        return Err("name, surname, gender, phone, country, city and street are required");
    }
    if profile.email.as_deref().is_some_and(|email| !valid_email(email)) {
        return Err("email is not valid");
    }
    if profile.date_of_birth > today {
        return Err("date_of_birth cannot be in the future");
    }
    Ok(())
}

/// Terms with the end date derived from the plan.
fn subscription_terms(
    plan: Plan,
    starts_on: NaiveDate,
    active: bool,
    price_cents: i64,
) -> Result<SubscriptionTerms, &'static str> {
    if price_cents <= 0 {
        return Err("price_cents must be greater than zero");
    }
    let ends_on = plan
        .ends_on(starts_on)
        .ok_or("subscription ends beyond the supported calendar")?;
    Ok(SubscriptionTerms {
        plan,
        starts_on,
        ends_on,
        active,
        price_cents,
    })
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn existing_member(state: &AppState, id: i64) -> Result<Member, Response> {
    match state.members.member(id).await {
        Ok(Some(member)) => Ok(member),
        Ok(None) => Err(member_not_found(id)),
        Err(err) => Err(internal_error("Failed to fetch member", err)),
    }
}

/// Member as seen by the caller under its `members` grant.
async fn reachable_member(
    state: &AppState,
    authorized: &Authorized,
    id: i64,
) -> Result<Member, Response> {
    let member = existing_member(state, id).await?;
    reachable(authorized, MEMBERS, member.created_by)?;
    Ok(member)
}

/// Subscription as seen by the caller under its `subscriptions` grant.
async fn reachable_subscription(
    state: &AppState,
    authorized: &Authorized,
    member_id: i64,
    id: i64,
) -> Result<Subscription, Response> {
    existing_member(state, member_id).await?;
    let subscription = match state.members.subscription(member_id, id).await {
        Ok(Some(subscription)) => subscription,
        Ok(None) => return Err(subscription_not_found(id)),
        Err(err) => return Err(internal_error("Failed to fetch subscription", err)),
    };
    reachable(authorized, SUBSCRIPTIONS, subscription.created_by)?;
    Ok(subscription)
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/members",
    responses(
        (status = 200, description = "Members visible to the caller", body = [Member]),
        (status = 401, description = "Not logged in"),
        (status = 403, description = "Forbidden"),
    ),
    tag = "members"
)]
pub async fn list_members(
    authorized: Authorized,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    match state.members.list_members(owner_filter(&authorized)).await {
        Ok(members) => respond(StatusCode::OK, "Members", members),
        Err(err) => internal_error("Failed to list members", err),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/members/{id}",
    params(("id" = i64, Path, description = "Member id")),
    responses(
        (status = 200, description = "Member", body = Member),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Member not found"),
    ),
    tag = "members"
)]
pub async fn get_member(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    match reachable_member(&state, &authorized, id).await {
        Ok(member) => respond(StatusCode::OK, "Member", member),
        Err(response) => response,
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/protected/members",
    request_body = CreateMemberRequest,
    responses(
        (status = 201, description = "Member enrolled with its first subscription", body = EnrolledMember),
        (status = 400, description = "Invalid member or subscription"),
        (status = 403, description = "Forbidden"),
    ),
    tag = "members"
)]
pub async fn create_member(
    authorized: Authorized,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<CreateMemberRequest>,
) -> Response {
    let profile = trimmed_profile(MemberProfile {
        name: request.name,
        surname: request.surname,
        gender: request.gender,
        date_of_birth: request.date_of_birth,
        phone: request.phone,
        email: request.email,
        country: request.country,
        city: request.city,
        street: request.street,
    });
    if let Err(message) = validate_profile(&profile, today()) {
        return reject(StatusCode::BAD_REQUEST, message);
    }
    let first = request.subscription;
    let terms = match subscription_terms(first.plan, first.starts_on, first.active, first.price_cents)
    {
        Ok(terms) => terms,
        Err(message) => return reject(StatusCode::BAD_REQUEST, message),
    };

    let actor = authorized.principal().id;
    match state.members.insert_member(&profile, &terms, actor).await {
        Ok(enrolled) => {
            info!(id = enrolled.member.id, actor, "Member enrolled");
            respond(StatusCode::CREATED, "Member created", enrolled)
        }
        Err(err) => internal_error("Failed to create member", err),
    }
}

#[utoipa::path(
    put,
    path = "/api/v1/protected/members/{id}",
    params(("id" = i64, Path, description = "Member id")),
    request_body = UpdateMemberRequest,
    responses(
        (status = 200, description = "Member updated", body = Member),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Member not found"),
    ),
    tag = "members"
)]
pub async fn update_member(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<UpdateMemberRequest>,
) -> Response {
    let member = match reachable_member(&state, &authorized, id).await {
        Ok(member) => member,
        Err(response) => return response,
    };

    let current = member.profile;
    let profile = trimmed_profile(MemberProfile {
        name: request.name.unwrap_or(current.name),
        surname: request.surname.unwrap_or(current.surname),
        gender: request.gender.unwrap_or(current.gender),
        date_of_birth: request.date_of_birth.unwrap_or(current.date_of_birth),
        phone: request.phone.unwrap_or(current.phone),
        email: request.email.or(current.email),
        country: request.country.unwrap_or(current.country),
        city: request.city.unwrap_or(current.city),
        street: request.street.unwrap_or(current.street),
    });
    if let Err(message) = validate_profile(&profile, today()) {
        return reject(StatusCode::BAD_REQUEST, message);
    }

    match state.members.update_member(id, &profile).await {
        Ok(Some(member)) => {
            info!(id, actor = authorized.principal().id, "Member updated");
            respond(StatusCode::OK, "Member updated", member)
        }
        Ok(None) => member_not_found(id),
        Err(err) => internal_error("Failed to update member", err),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/protected/members/{id}",
    params(("id" = i64, Path, description = "Member id")),
    responses(
        (status = 200, description = "Member and their subscriptions deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Member not found"),
    ),
    tag = "members"
)]
pub async fn delete_member(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = reachable_member(&state, &authorized, id).await {
        return response;
    }
    match state.members.delete_member(id).await {
        Ok(true) => {
            info!(id, actor = authorized.principal().id, "Member deleted");
            respond(StatusCode::OK, "Member deleted", ())
        }
        Ok(false) => member_not_found(id),
        Err(err) => internal_error("Failed to delete member", err),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/members/{id}/subscriptions",
    params(("id" = i64, Path, description = "Member id")),
    responses(
        (status = 200, description = "Subscriptions of the member visible to the caller", body = [Subscription]),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Member not found"),
    ),
    tag = "subscriptions"
)]
pub async fn list_subscriptions(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = existing_member(&state, id).await {
        return response;
    }
    match state
        .members
        .list_subscriptions(id, owner_filter(&authorized))
        .await
    {
        Ok(subscriptions) => respond(StatusCode::OK, "Subscriptions", subscriptions),
        Err(err) => internal_error("Failed to list subscriptions", err),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/protected/members/{id}/subscriptions",
    params(("id" = i64, Path, description = "Member id")),
    request_body = SubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = Subscription),
        (status = 400, description = "Invalid subscription"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Member not found"),
    ),
    tag = "subscriptions"
)]
pub async fn create_subscription(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<SubscriptionRequest>,
) -> Response {
    if let Err(response) = existing_member(&state, id).await {
        return response;
    }
    let terms = match subscription_terms(
        request.plan,
        request.starts_on,
        request.active,
        request.price_cents,
    ) {
        Ok(terms) => terms,
        Err(message) => return reject(StatusCode::BAD_REQUEST, message),
    };

    let actor = authorized.principal().id;
    match state.members.insert_subscription(id, &terms, actor).await {
        Ok(Some(subscription)) => {
            info!(id = subscription.id, member_id = id, actor, "Subscription created");
            respond(StatusCode::CREATED, "Subscription created", subscription)
        }
        Ok(None) => member_not_found(id),
        Err(err) => internal_error("Failed to create subscription", err),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/members/{id}/subscriptions/{sub_id}",
    params(
        ("id" = i64, Path, description = "Member id"),
        ("sub_id" = i64, Path, description = "Subscription id"),
    ),
    responses(
        (status = 200, description = "Subscription", body = Subscription),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Member or subscription not found"),
    ),
    tag = "subscriptions"
)]
pub async fn get_subscription(
    authorized: Authorized,
    Path((id, sub_id)): Path<(i64, i64)>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    match reachable_subscription(&state, &authorized, id, sub_id).await {
        Ok(subscription) => respond(StatusCode::OK, "Subscription", subscription),
        Err(response) => response,
    }
}

#[utoipa::path(
    put,
    path = "/api/v1/protected/members/{id}/subscriptions/{sub_id}",
    params(
        ("id" = i64, Path, description = "Member id"),
        ("sub_id" = i64, Path, description = "Subscription id"),
    ),
    request_body = UpdateSubscriptionRequest,
    responses(
        (status = 200, description = "Subscription updated", body = Subscription),
        (status = 400, description = "Invalid subscription"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Member or subscription not found"),
    ),
    tag = "subscriptions"
)]
pub async fn update_subscription(
    authorized: Authorized,
    Path((id, sub_id)): Path<(i64, i64)>,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> Response {
    let current = match reachable_subscription(&state, &authorized, id, sub_id).await {
        Ok(subscription) => subscription.terms,
        Err(response) => return response,
    };
    let terms = match subscription_terms(
        request.plan.unwrap_or(current.plan),
        request.starts_on.unwrap_or(current.starts_on),
        request.active.unwrap_or(current.active),
        request.price_cents.unwrap_or(current.price_cents),
    ) {
        Ok(terms) => terms,
        Err(message) => return reject(StatusCode::BAD_REQUEST, message),
    };

    match state.members.update_subscription(id, sub_id, &terms).await {
        Ok(Some(subscription)) => {
            info!(id = sub_id, member_id = id, actor = authorized.principal().id, "Subscription updated");
            respond(StatusCode::OK, "Subscription updated", subscription)
        }
        Ok(None) => subscription_not_found(sub_id),
        Err(err) => internal_error("Failed to update subscription", err),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/protected/members/{id}/subscriptions/{sub_id}",
    params(
        ("id" = i64, Path, description = "Member id"),
        ("sub_id" = i64, Path, description = "Subscription id"),
    ),
    responses(
        (status = 200, description = "Subscription deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Member or subscription not found"),
    ),
    tag = "subscriptions"
)]
pub async fn delete_subscription(
    authorized: Authorized,
    Path((id, sub_id)): Path<(i64, i64)>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = reachable_subscription(&state, &authorized, id, sub_id).await {
        return response;
    }
    match state.members.delete_subscription(id, sub_id).await {
        Ok(true) => {
            info!(id = sub_id, member_id = id, actor = authorized.principal().id, "Subscription deleted");
            respond(StatusCode::OK, "Subscription deleted", ())
        }
        Ok(false) => subscription_not_found(sub_id),
        Err(err) => internal_error("Failed to delete subscription", err),
    }
}
