#![allow(clippy::needless_for_each)]

use utoipa::OpenApi;

use super::handlers::{auth, health, members, permissions, roles, users};
use crate::store::{
    EnrolledMember, Member, MemberProfile, Permission, PermissionLevels, Plan, Principal, Role,
    Subscription, SubscriptionTerms,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::logout_all,
        auth::session,
        roles::list_roles,
        roles::get_role,
        roles::create_role,
        roles::update_role,
        roles::delete_role,
        permissions::list_permissions,
        permissions::get_permission,
        permissions::create_permission,
        permissions::update_permission,
        permissions::delete_permission,
        permissions::list_role_permissions,
        permissions::create_role_permission,
        users::list_users,
        users::get_user,
        users::create_user,
        users::update_user,
        users::delete_user,
        members::list_members,
        members::get_member,
        members::create_member,
        members::update_member,
        members::delete_member,
        members::list_subscriptions,
        members::create_subscription,
        members::get_subscription,
        members::update_subscription,
        members::delete_subscription,
    ),
    components(
        schemas(
            health::Health,
            auth::LoginRequest,
            auth::LoginResponse,
            auth::RefreshRequest,
            auth::RefreshResponse,
            auth::SessionResponse,
            auth::LogoutAllResponse,
            roles::RoleRequest,
            permissions::CreatePermissionRequest,
            permissions::RolePermissionRequest,
            users::CreateUserRequest,
            users::UpdateUserRequest,
            members::CreateMemberRequest,
            members::UpdateMemberRequest,
            members::SubscriptionRequest,
            members::UpdateSubscriptionRequest,
            Principal,
            Role,
            Permission,
            PermissionLevels,
            Member,
            MemberProfile,
            EnrolledMember,
            Subscription,
            SubscriptionTerms,
            Plan,
        )
    ),
    tags(
        (name = "health", description = "Liveness of the service and its stores"),
        (name = "auth", description = "Login, refresh and logout"),
        (name = "roles", description = "Role administration"),
        (name = "permissions", description = "Permission matrix administration"),
        (name = "users", description = "User administration"),
        (name = "members", description = "Gym members"),
        (name = "subscriptions", description = "Subscriptions of a member"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
