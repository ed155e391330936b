//! Gym members and their subscriptions.
//!
//! Both record kinds carry `created_by`, the user who inserted them; an
//! `Own` grant on `members` or `subscriptions` reaches only those rows.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

/// Subscription length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Monthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl Plan {
    #[must_use]
    pub const fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
            Self::Semiannual => 6,
            Self::Annual => 12,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Semiannual => "semiannual",
            Self::Annual => "annual",
        }
    }

    /// Last covered day. Month ends clamp, so Jan 31 + 1 month is Feb 28/29.
    #[must_use]
    pub fn ends_on(self, starts_on: NaiveDate) -> Option<NaiveDate> {
        starts_on.checked_add_months(Months::new(self.months()))
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "semiannual" => Ok(Self::Semiannual),
            "annual" => Ok(Self::Annual),
            other => Err(anyhow!("unknown subscription plan: {other}")),
        }
    }
}

/// Member fields set by staff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct MemberProfile {
    pub name: String,
    pub surname: String,
    pub gender: String,
    pub date_of_birth: NaiveDate,
    pub phone: String,
    pub email: Option<String>,
    pub country: String,
    pub city: String,
    pub street: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Member {
    pub id: i64,
    #[serde(flatten)]
    pub profile: MemberProfile,
    /// `None` once the creating user is deleted.
    pub created_by: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct SubscriptionTerms {
    pub plan: Plan,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub active: bool,
    pub price_cents: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Subscription {
    pub id: i64,
    pub member_id: i64,
    #[serde(flatten)]
    pub terms: SubscriptionTerms,
    pub created_by: Option<i64>,
}

/// Member with the subscription created alongside it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct EnrolledMember {
    #[serde(flatten)]
    pub member: Member,
    pub subscription: Subscription,
}

/// `owner` filters on `created_by` wherever a list takes it.
#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn list_members(&self, owner: Option<i64>) -> Result<Vec<Member>>;

    async fn member(&self, id: i64) -> Result<Option<Member>>;

    /// Insert the member and its first subscription in one transaction.
    async fn insert_member(
        &self,
        profile: &MemberProfile,
        first: &SubscriptionTerms,
        created_by: i64,
    ) -> Result<EnrolledMember>;

    async fn update_member(&self, id: i64, profile: &MemberProfile) -> Result<Option<Member>>;

    /// Subscriptions of the member go with it.
    async fn delete_member(&self, id: i64) -> Result<bool>;

    async fn list_subscriptions(
        &self,
        member_id: i64,
        owner: Option<i64>,
    ) -> Result<Vec<Subscription>>;

    async fn subscription(&self, member_id: i64, id: i64) -> Result<Option<Subscription>>;

    /// `None` when the member does not exist.
    async fn insert_subscription(
        &self,
        member_id: i64,
        terms: &SubscriptionTerms,
        created_by: i64,
    ) -> Result<Option<Subscription>>;

    async fn update_subscription(
        &self,
        member_id: i64,
        id: i64,
        terms: &SubscriptionTerms,
    ) -> Result<Option<Subscription>>;

    async fn delete_subscription(&self, member_id: i64, id: i64) -> Result<bool>;
}
