//! Postgres implementation of the identity, permission and member stores.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, Instrument};

use super::{
    is_foreign_key_violation, is_unique_violation, Credentials, DeleteOutcome, EnrolledMember,
    IdentityStore, Member, MemberProfile, MemberStore, NewPermission, NewPrincipal, Permission,
    PermissionFilter, PermissionLevels, PermissionStore, Principal, PrincipalUpdate, Role,
    Subscription, SubscriptionTerms, WriteOutcome,
};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

const PRINCIPAL_COLUMNS: &str = "id, email, name, surname, role_id";
const PERMISSION_COLUMNS: &str =
    "id, resource, role_id, create_level, read_level, update_level, delete_level";
const MEMBER_COLUMNS: &str =
    "id, name, surname, gender, date_of_birth, phone, email, country, city, street, created_by";
const SUBSCRIPTION_COLUMNS: &str =
    "id, member_id, plan, starts_on, ends_on, active, price_cents, created_by";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Create missing tables and indexes.
///
/// # Errors
/// Returns an error naming the first statement that fails.
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
    }
    debug!("Schema applied");
    Ok(())
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn principal_from_row(row: &PgRow) -> Principal {
    Principal {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        surname: row.get("surname"),
        role_id: row.get("role_id"),
    }
}

fn role_from_row(row: &PgRow) -> Role {
    Role {
        id: row.get("id"),
        name: row.get("name"),
    }
}

fn permission_from_row(row: &PgRow) -> Permission {
    Permission {
        id: row.get("id"),
        resource: row.get("resource"),
        role_id: row.get("role_id"),
        levels: PermissionLevels {
            create: row.get("create_level"),
            read: row.get("read_level"),
            update: row.get("update_level"),
            delete: row.get("delete_level"),
        },
    }
}

fn member_from_row(row: &PgRow) -> Member {
    Member {
        id: row.get("id"),
        profile: MemberProfile {
            name: row.get("name"),
            surname: row.get("surname"),
            gender: row.get("gender"),
            date_of_birth: row.get("date_of_birth"),
            phone: row.get("phone"),
            email: row.get("email"),
            country: row.get("country"),
            city: row.get("city"),
            street: row.get("street"),
        },
        created_by: row.get("created_by"),
    }
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    let plan: String = row.get("plan");
    Ok(Subscription {
        id: row.get("id"),
        member_id: row.get("member_id"),
        terms: SubscriptionTerms {
            plan: plan.parse()?,
            starts_on: row.get("starts_on"),
            ends_on: row.get("ends_on"),
            active: row.get("active"),
            price_cents: row.get("price_cents"),
        },
        created_by: row.get("created_by"),
    })
}

fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn principal(&self, id: i64) -> Result<Option<Principal>> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup principal")?;
        Ok(row.as_ref().map(principal_from_row))
    }

    async fn credentials_by_email(&self, email: &str) -> Result<Option<Credentials>> {
        let query =
            format!("SELECT {PRINCIPAL_COLUMNS}, password_hash FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup credentials")?;
        Ok(row.map(|row| Credentials {
            principal: principal_from_row(&row),
            password_hash: row.get("password_hash"),
        }))
    }

    async fn list_principals(&self, excluded_role: i64) -> Result<Vec<Principal>> {
        let query =
            format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE role_id <> $1 ORDER BY id");
        let rows = sqlx::query(&query)
            .bind(excluded_role)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list principals")?;
        Ok(rows.iter().map(principal_from_row).collect())
    }

    async fn insert_principal(&self, principal: NewPrincipal) -> Result<WriteOutcome<Principal>> {
        let query = format!(
            r"
            INSERT INTO users (email, name, surname, password_hash, role_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {PRINCIPAL_COLUMNS}
            "
        );
        let result = sqlx::query(&query)
            .bind(&principal.email)
            .bind(&principal.name)
            .bind(&principal.surname)
            .bind(&principal.password_hash)
            .bind(principal.role_id)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await;

        match result {
            Ok(row) => Ok(WriteOutcome::Written(principal_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Conflict),
            Err(err) if is_foreign_key_violation(&err) => Ok(WriteOutcome::NotFound),
            Err(err) => Err(err).context("failed to insert principal"),
        }
    }

    async fn update_principal(
        &self,
        id: i64,
        update: PrincipalUpdate,
    ) -> Result<WriteOutcome<Principal>> {
        let query = format!(
            r"
            UPDATE users SET
                email = COALESCE($2, email),
                name = COALESCE($3, name),
                surname = COALESCE($4, surname),
                role_id = COALESCE($5, role_id),
                password_hash = COALESCE($6, password_hash),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRINCIPAL_COLUMNS}
            "
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(update.email)
            .bind(update.name)
            .bind(update.surname)
            .bind(update.role_id)
            .bind(update.password_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await;

        match result {
            Ok(Some(row)) => Ok(WriteOutcome::Written(principal_from_row(&row))),
            Ok(None) => Ok(WriteOutcome::NotFound),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Conflict),
            Err(err) if is_foreign_key_violation(&err) => Ok(WriteOutcome::NotFound),
            Err(err) => Err(err).context("failed to update principal"),
        }
    }

    async fn delete_principal(&self, id: i64) -> Result<DeleteOutcome> {
        let query = "DELETE FROM users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(DeleteOutcome::NotFound),
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(err) if is_foreign_key_violation(&err) => Ok(DeleteOutcome::InUse),
            Err(err) => Err(err).context("failed to delete principal"),
        }
    }

    async fn role(&self, id: i64) -> Result<Option<Role>> {
        let query = "SELECT id, name FROM roles WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup role")?;
        Ok(row.as_ref().map(role_from_row))
    }

    async fn role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let query = "SELECT id, name FROM roles WHERE name = $1";
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup role by name")?;
        Ok(row.as_ref().map(role_from_row))
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let query = "SELECT id, name FROM roles ORDER BY id";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list roles")?;
        Ok(rows.iter().map(role_from_row).collect())
    }

    async fn insert_role(&self, name: &str) -> Result<WriteOutcome<Role>> {
        let query = "INSERT INTO roles (name) VALUES ($1) RETURNING id, name";
        let result = sqlx::query(query)
            .bind(name)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(row) => Ok(WriteOutcome::Written(role_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert role"),
        }
    }

    async fn rename_role(&self, id: i64, name: &str) -> Result<WriteOutcome<Role>> {
        let query = "UPDATE roles SET name = $2 WHERE id = $1 RETURNING id, name";
        let result = sqlx::query(query)
            .bind(id)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await;

        match result {
            Ok(Some(row)) => Ok(WriteOutcome::Written(role_from_row(&row))),
            Ok(None) => Ok(WriteOutcome::NotFound),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Conflict),
            Err(err) => Err(err).context("failed to rename role"),
        }
    }

    async fn delete_role(&self, id: i64) -> Result<DeleteOutcome> {
        // permissions rows cascade; users block the delete.
        let query = "DELETE FROM roles WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(DeleteOutcome::NotFound),
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(err) if is_foreign_key_violation(&err) => Ok(DeleteOutcome::InUse),
            Err(err) => Err(err).context("failed to delete role"),
        }
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(tracing::info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await
            .context("database ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn insert_permission(
        &self,
        permission: NewPermission,
    ) -> Result<WriteOutcome<Permission>> {
        let query = format!(
            r"
            INSERT INTO permissions
                (resource, role_id, create_level, read_level, update_level, delete_level)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PERMISSION_COLUMNS}
            "
        );
        let result = sqlx::query(&query)
            .bind(&permission.resource)
            .bind(permission.role_id)
            .bind(permission.levels.create)
            .bind(permission.levels.read)
            .bind(permission.levels.update)
            .bind(permission.levels.delete)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await;

        match result {
            Ok(row) => Ok(WriteOutcome::Written(permission_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Conflict),
            Err(err) if is_foreign_key_violation(&err) => Ok(WriteOutcome::NotFound),
            Err(err) => Err(err).context("failed to insert permission"),
        }
    }

    async fn permission(&self, id: i64) -> Result<Option<Permission>> {
        let query = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup permission")?;
        Ok(row.as_ref().map(permission_from_row))
    }

    async fn update_permission(
        &self,
        id: i64,
        levels: PermissionLevels,
    ) -> Result<Option<Permission>> {
        let query = format!(
            r"
            UPDATE permissions
            SET create_level = $2, read_level = $3, update_level = $4, delete_level = $5
            WHERE id = $1
            RETURNING {PERMISSION_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(levels.create)
            .bind(levels.read)
            .bind(levels.update)
            .bind(levels.delete)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update permission")?;
        Ok(row.as_ref().map(permission_from_row))
    }

    async fn delete_permission(&self, id: i64) -> Result<bool> {
        let query = "DELETE FROM permissions WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete permission")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_permissions(&self, filter: &PermissionFilter) -> Result<Vec<Permission>> {
        let rows = match filter {
            PermissionFilter::All => {
                let query = format!("SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY id");
                sqlx::query(&query)
                    .fetch_all(&self.pool)
                    .instrument(db_span("SELECT", &query))
                    .await
            }
            PermissionFilter::Role(role_id) => {
                let query = format!(
                    "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE role_id = $1 ORDER BY id"
                );
                sqlx::query(&query)
                    .bind(role_id)
                    .fetch_all(&self.pool)
                    .instrument(db_span("SELECT", &query))
                    .await
            }
            PermissionFilter::Resource(resource) => {
                let query = format!(
                    "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE resource = $1 ORDER BY id"
                );
                sqlx::query(&query)
                    .bind(resource)
                    .fetch_all(&self.pool)
                    .instrument(db_span("SELECT", &query))
                    .await
            }
        }
        .context("failed to list permissions")?;
        Ok(rows.iter().map(permission_from_row).collect())
    }

    async fn find_permission(&self, resource: &str, role_id: i64) -> Result<Option<Permission>> {
        let query = format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE resource = $1 AND role_id = $2"
        );
        let row = sqlx::query(&query)
            .bind(resource)
            .bind(role_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to find permission")?;
        Ok(row.as_ref().map(permission_from_row))
    }

    async fn insert_permissions_atomic(&self, permissions: &[NewPermission]) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin permission bootstrap transaction")?;

        let query = r"
            INSERT INTO permissions
                (resource, role_id, create_level, read_level, update_level, delete_level)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (resource, role_id) DO NOTHING
        ";
        let mut written = 0;
        for permission in permissions {
            let result = sqlx::query(query)
                .bind(&permission.resource)
                .bind(permission.role_id)
                .bind(permission.levels.create)
                .bind(permission.levels.read)
                .bind(permission.levels.update)
                .bind(permission.levels.delete)
                .execute(&mut *tx)
                .instrument(db_span("INSERT", query))
                .await
                .with_context(|| format!("failed to insert permission for {}", permission.resource))?;
            written += result.rows_affected();
        }

        tx.commit()
            .await
            .context("commit permission bootstrap transaction")?;
        Ok(written)
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let query = r"
            SELECT table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
            ORDER BY table_name
        ";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list tables")?;
        Ok(rows.iter().map(|row| row.get("table_name")).collect())
    }
}

#[async_trait]
impl MemberStore for PgStore {
    async fn list_members(&self, owner: Option<i64>) -> Result<Vec<Member>> {
        let query = format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE ($1::BIGINT IS NULL OR created_by = $1) ORDER BY id"
        );
        let rows = sqlx::query(&query)
            .bind(owner)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list members")?;
        Ok(rows.iter().map(member_from_row).collect())
    }

    async fn member(&self, id: i64) -> Result<Option<Member>> {
        let query = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup member")?;
        Ok(row.as_ref().map(member_from_row))
    }

    async fn insert_member(
        &self,
        profile: &MemberProfile,
        first: &SubscriptionTerms,
        created_by: i64,
    ) -> Result<EnrolledMember> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin member enrollment transaction")?;

        let member_query = format!(
            r"
            INSERT INTO members
                (name, surname, gender, date_of_birth, phone, email, country, city, street, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {MEMBER_COLUMNS}
            "
        );
        let row = sqlx::query(&member_query)
            .bind(&profile.name)
            .bind(&profile.surname)
            .bind(&profile.gender)
            .bind(profile.date_of_birth)
            .bind(&profile.phone)
            .bind(&profile.email)
            .bind(&profile.country)
            .bind(&profile.city)
            .bind(&profile.street)
            .bind(created_by)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", &member_query))
            .await
            .context("failed to insert member")?;
        let member = member_from_row(&row);

        let subscription_query = format!(
            r"
            INSERT INTO subscriptions
                (member_id, plan, starts_on, ends_on, active, price_cents, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "
        );
        let row = sqlx::query(&subscription_query)
            .bind(member.id)
            .bind(first.plan.as_str())
            .bind(first.starts_on)
            .bind(first.ends_on)
            .bind(first.active)
            .bind(first.price_cents)
            .bind(created_by)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", &subscription_query))
            .await
            .context("failed to insert first subscription")?;
        let subscription = subscription_from_row(&row)?;

        tx.commit()
            .await
            .context("commit member enrollment transaction")?;
        Ok(EnrolledMember {
            member,
            subscription,
        })
    }

    async fn update_member(&self, id: i64, profile: &MemberProfile) -> Result<Option<Member>> {
        let query = format!(
            r"
            UPDATE members SET
                name = $2, surname = $3, gender = $4, date_of_birth = $5, phone = $6,
                email = $7, country = $8, city = $9, street = $10, updated_at = NOW()
            WHERE id = $1
            RETURNING {MEMBER_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&profile.name)
            .bind(&profile.surname)
            .bind(&profile.gender)
            .bind(profile.date_of_birth)
            .bind(&profile.phone)
            .bind(&profile.email)
            .bind(&profile.country)
            .bind(&profile.city)
            .bind(&profile.street)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update member")?;
        Ok(row.as_ref().map(member_from_row))
    }

    async fn delete_member(&self, id: i64) -> Result<bool> {
        let query = "DELETE FROM members WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete member")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_subscriptions(
        &self,
        member_id: i64,
        owner: Option<i64>,
    ) -> Result<Vec<Subscription>> {
        let query = format!(
            r"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
            WHERE member_id = $1 AND ($2::BIGINT IS NULL OR created_by = $2)
            ORDER BY starts_on, id
            "
        );
        let rows = sqlx::query(&query)
            .bind(member_id)
            .bind(owner)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list subscriptions")?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn subscription(&self, member_id: i64, id: i64) -> Result<Option<Subscription>> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE member_id = $1 AND id = $2"
        );
        let row = sqlx::query(&query)
            .bind(member_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup subscription")?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn insert_subscription(
        &self,
        member_id: i64,
        terms: &SubscriptionTerms,
        created_by: i64,
    ) -> Result<Option<Subscription>> {
        let query = format!(
            r"
            INSERT INTO subscriptions
                (member_id, plan, starts_on, ends_on, active, price_cents, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "
        );
        let result = sqlx::query(&query)
            .bind(member_id)
            .bind(terms.plan.as_str())
            .bind(terms.starts_on)
            .bind(terms.ends_on)
            .bind(terms.active)
            .bind(terms.price_cents)
            .bind(created_by)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await;

        match result {
            Ok(row) => subscription_from_row(&row).map(Some),
            Err(err) if is_foreign_key_violation(&err) => Ok(None),
            Err(err) => Err(err).context("failed to insert subscription"),
        }
    }

    async fn update_subscription(
        &self,
        member_id: i64,
        id: i64,
        terms: &SubscriptionTerms,
    ) -> Result<Option<Subscription>> {
        let query = format!(
            r"
            UPDATE subscriptions SET
                plan = $3, starts_on = $4, ends_on = $5, active = $6, price_cents = $7
            WHERE member_id = $1 AND id = $2
            RETURNING {SUBSCRIPTION_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(member_id)
            .bind(id)
            .bind(terms.plan.as_str())
            .bind(terms.starts_on)
            .bind(terms.ends_on)
            .bind(terms.active)
            .bind(terms.price_cents)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update subscription")?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn delete_subscription(&self, member_id: i64, id: i64) -> Result<bool> {
        let query = "DELETE FROM subscriptions WHERE member_id = $1 AND id = $2";
        let result = sqlx::query(query)
            .bind(member_id)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete subscription")?;
        Ok(result.rows_affected() > 0)
    }
}
