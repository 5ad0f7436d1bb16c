//! Postgres-backed `Store`.
//!
//! Entity graphs (user -> roles/groups -> permissions) are hydrated with
//! follow-up queries rather than one wide join; the flows touch a single
//! user and client per request, so the extra round-trips stay bounded.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::Store;
use crate::model::{
    AcrLevel, AuthorizationCode, Client, CodeChallengeMethod, Group, KeyPair, Permission, Role,
    SessionClient, User, UserConsent, UserSession,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn acr_from_row(row: &sqlx::postgres::PgRow, column: &str) -> Result<AcrLevel> {
    let raw: i16 = row.try_get(column)?;
    let level = u8::try_from(raw).map_err(|_| anyhow!("acr level out of range: {raw}"))?;
    AcrLevel::from_level(level).ok_or_else(|| anyhow!("unknown acr level: {level}"))
}

fn challenge_method_from_row(row: &sqlx::postgres::PgRow) -> Result<Option<CodeChallengeMethod>> {
    let raw: Option<String> = row.try_get("code_challenge_method")?;
    raw.map(|s| {
        s.parse()
            .map_err(|()| anyhow!("unknown code challenge method: {s}"))
    })
    .transpose()
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn permissions_by_join(&self, query: &'static str, id: Uuid) -> Result<Vec<Permission>> {
        let span = query_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch permissions")?;

        Ok(rows
            .into_iter()
            .map(|row| Permission {
                id: row.get("id"),
                resource: row.get("resource"),
                permission: row.get("permission"),
            })
            .collect())
    }

    async fn roles_by_join(&self, query: &'static str, id: Uuid) -> Result<Vec<Role>> {
        let span = query_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch roles")?;

        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            let role_id: Uuid = row.get("id");
            let permissions = self
                .permissions_by_join(
                    "SELECT p.id, p.resource, p.permission FROM permissions p \
                     JOIN role_permissions rp ON rp.permission_id = p.id WHERE rp.role_id = $1",
                    role_id,
                )
                .await?;
            roles.push(Role {
                id: role_id,
                name: row.get("name"),
                permissions,
            });
        }
        Ok(roles)
    }

    async fn groups_for_user(&self, user_id: Uuid) -> Result<Vec<Group>> {
        let query = "SELECT g.id, g.name FROM groups g \
                     JOIN user_groups ug ON ug.group_id = g.id WHERE ug.user_id = $1";
        let span = query_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch groups")?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let group_id: Uuid = row.get("id");
            let roles = self
                .roles_by_join(
                    "SELECT r.id, r.name FROM roles r \
                     JOIN group_roles gr ON gr.role_id = r.id WHERE gr.group_id = $1",
                    group_id,
                )
                .await?;
            let permissions = self
                .permissions_by_join(
                    "SELECT p.id, p.resource, p.permission FROM permissions p \
                     JOIN group_permissions gp ON gp.permission_id = p.id WHERE gp.group_id = $1",
                    group_id,
                )
                .await?;
            groups.push(Group {
                id: group_id,
                name: row.get("name"),
                roles,
                permissions,
            });
        }
        Ok(groups)
    }

    async fn hydrate_user(&self, row: sqlx::postgres::PgRow) -> Result<User> {
        let user_id: Uuid = row.get("id");
        let permissions = self
            .permissions_by_join(
                "SELECT p.id, p.resource, p.permission FROM permissions p \
                 JOIN user_permissions up ON up.permission_id = p.id WHERE up.user_id = $1",
                user_id,
            )
            .await?;
        let roles = self
            .roles_by_join(
                "SELECT r.id, r.name FROM roles r \
                 JOIN user_roles ur ON ur.role_id = r.id WHERE ur.user_id = $1",
                user_id,
            )
            .await?;
        let groups = self.groups_for_user(user_id).await?;

        Ok(User {
            id: user_id,
            subject: row.get("subject"),
            username: row.get("username"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            otp_secret: row.get("otp_secret"),
            roles,
            groups,
            permissions,
        })
    }

    async fn user_by(&self, query: &'static str, bind: &str) -> Result<Option<User>> {
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(bind)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up user")?;

        match row {
            Some(row) => Ok(Some(self.hydrate_user(row).await?)),
            None => Ok(None),
        }
    }

    async fn hydrate_client(&self, row: sqlx::postgres::PgRow) -> Result<Client> {
        let client_id: Uuid = row.get("id");

        let uri_query =
            "SELECT uri FROM client_redirect_uris WHERE client_id = $1 ORDER BY uri";
        let span = query_span("SELECT", uri_query);
        let uri_rows = sqlx::query(uri_query)
            .bind(client_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch redirect uris")?;
        let redirect_uris = uri_rows.into_iter().map(|r| r.get("uri")).collect();

        let permissions = self
            .permissions_by_join(
                "SELECT p.id, p.resource, p.permission FROM permissions p \
                 JOIN client_permissions cp ON cp.permission_id = p.id WHERE cp.client_id = $1",
                client_id,
            )
            .await?;

        Ok(Client {
            id: client_id,
            client_identifier: row.get("client_identifier"),
            client_secret: row.get("client_secret"),
            is_public: row.get("is_public"),
            redirect_uris,
            permissions,
            allow_offline_access: row.get("allow_offline_access"),
            required_acr_level: acr_from_row(&row, "required_acr_level")?,
        })
    }

    fn code_from_row(row: &sqlx::postgres::PgRow) -> Result<AuthorizationCode> {
        Ok(AuthorizationCode {
            id: row.get("id"),
            code: row.get("code"),
            user_id: row.get("user_id"),
            client_id: row.get("client_id"),
            scope: row.get("scope"),
            redirect_uri: row.get("redirect_uri"),
            code_challenge: row.get("code_challenge"),
            code_challenge_method: challenge_method_from_row(row)?,
            nonce: row.get("nonce"),
            acr_level: acr_from_row(row, "acr_level")?,
            auth_methods: row.get("auth_methods"),
            session_identifier: row.get("session_identifier"),
            used: row.get("used"),
            created_at_unix: row.get("created_at_unix"),
            expires_at_unix: row.get("expires_at_unix"),
        })
    }

    async fn session_clients(&self, session_id: Uuid) -> Result<Vec<SessionClient>> {
        let query = "SELECT client_id, last_accessed_unix FROM user_session_clients \
                     WHERE session_id = $1 ORDER BY last_accessed_unix";
        let span = query_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch session clients")?;

        Ok(rows
            .into_iter()
            .map(|row| SessionClient {
                client_id: row.get("client_id"),
                last_accessed_unix: row.get("last_accessed_unix"),
            })
            .collect())
    }

    async fn replace_session_clients(&self, session: &UserSession) -> Result<()> {
        let query = "INSERT INTO user_session_clients (session_id, client_id, last_accessed_unix) \
                     VALUES ($1, $2, $3) \
                     ON CONFLICT (session_id, client_id) \
                     DO UPDATE SET last_accessed_unix = EXCLUDED.last_accessed_unix";
        for client in &session.clients {
            let span = query_span("INSERT", query);
            sqlx::query(query)
                .bind(session.id)
                .bind(client.client_id)
                .bind(client.last_accessed_unix)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to upsert session client")?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = "SELECT id, subject, username, email, password_hash, otp_secret \
                     FROM users WHERE id = $1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up user by id")?;

        match row {
            Some(row) => Ok(Some(self.hydrate_user(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_user_by_subject(&self, subject: Uuid) -> Result<Option<User>> {
        let query = "SELECT id, subject, username, email, password_hash, otp_secret \
                     FROM users WHERE subject = $1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(subject)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up user by subject")?;

        match row {
            Some(row) => Ok(Some(self.hydrate_user(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.user_by(
            "SELECT id, subject, username, email, password_hash, otp_secret \
             FROM users WHERE username = $1",
            username,
        )
        .await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.user_by(
            "SELECT id, subject, username, email, password_hash, otp_secret \
             FROM users WHERE email = $1",
            email,
        )
        .await
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let query = "UPDATE users SET otp_secret = $2 WHERE id = $1";
        let span = query_span("UPDATE", query);
        sqlx::query(query)
            .bind(user.id)
            .bind(&user.otp_secret)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update user")?;
        Ok(())
    }

    async fn get_client_by_id(&self, id: Uuid) -> Result<Option<Client>> {
        let query = "SELECT id, client_identifier, client_secret, is_public, \
                     allow_offline_access, required_acr_level FROM clients WHERE id = $1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up client by id")?;

        match row {
            Some(row) => Ok(Some(self.hydrate_client(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_client_by_identifier(&self, identifier: &str) -> Result<Option<Client>> {
        let query = "SELECT id, client_identifier, client_secret, is_public, \
                     allow_offline_access, required_acr_level FROM clients \
                     WHERE client_identifier = $1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up client")?;

        match row {
            Some(row) => Ok(Some(self.hydrate_client(row).await?)),
            None => Ok(None),
        }
    }

    async fn create_code(&self, code: &AuthorizationCode) -> Result<()> {
        let query = "INSERT INTO authorization_codes \
             (id, code, user_id, client_id, scope, redirect_uri, code_challenge, \
              code_challenge_method, nonce, acr_level, auth_methods, session_identifier, \
              used, created_at_unix, expires_at_unix) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)";
        let span = query_span("INSERT", query);
        sqlx::query(query)
            .bind(code.id)
            .bind(&code.code)
            .bind(code.user_id)
            .bind(code.client_id)
            .bind(&code.scope)
            .bind(&code.redirect_uri)
            .bind(&code.code_challenge)
            .bind(code.code_challenge_method.map(CodeChallengeMethod::as_str))
            .bind(&code.nonce)
            .bind(i16::from(code.acr_level.level()))
            .bind(&code.auth_methods)
            .bind(&code.session_identifier)
            .bind(code.used)
            .bind(code.created_at_unix)
            .bind(code.expires_at_unix)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert authorization code")?;
        Ok(())
    }

    async fn get_code(&self, value: &str) -> Result<Option<AuthorizationCode>> {
        let query = "SELECT * FROM authorization_codes WHERE code = $1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up authorization code")?;

        row.as_ref().map(Self::code_from_row).transpose()
    }

    async fn redeem_code(&self, value: &str) -> Result<Option<AuthorizationCode>> {
        // The WHERE used = false guard makes redemption first-wins under
        // concurrency; losers see zero rows.
        let query = "UPDATE authorization_codes SET used = true \
                     WHERE code = $1 AND used = false RETURNING *";
        let span = query_span("UPDATE", query);
        let row = sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to redeem authorization code")?;

        row.as_ref().map(Self::code_from_row).transpose()
    }

    async fn delete_expired_codes(&self, now_unix: i64) -> Result<u64> {
        let query = "DELETE FROM authorization_codes WHERE expires_at_unix <= $1";
        let span = query_span("DELETE", query);
        let result = sqlx::query(query)
            .bind(now_unix)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete expired codes")?;
        Ok(result.rows_affected())
    }

    async fn current_signing_key(&self) -> Result<Option<KeyPair>> {
        let query = "SELECT id, algorithm, private_key_pem, public_key_pem \
                     FROM signing_keys ORDER BY id DESC LIMIT 1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch current signing key")?;

        Ok(row.map(|row| KeyPair {
            id: row.get("id"),
            algorithm: row.get("algorithm"),
            private_key_pem: row.get("private_key_pem"),
            public_key_pem: row.get("public_key_pem"),
        }))
    }

    async fn get_signing_key_by_id(&self, id: i64) -> Result<Option<KeyPair>> {
        let query = "SELECT id, algorithm, private_key_pem, public_key_pem \
                     FROM signing_keys WHERE id = $1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch signing key")?;

        Ok(row.map(|row| KeyPair {
            id: row.get("id"),
            algorithm: row.get("algorithm"),
            private_key_pem: row.get("private_key_pem"),
            public_key_pem: row.get("public_key_pem"),
        }))
    }

    async fn get_user_session_by_identifier(
        &self,
        session_identifier: &str,
    ) -> Result<Option<UserSession>> {
        let query = "SELECT id, session_identifier, user_id, auth_methods, acr_level, \
                     started_at_unix, last_accessed_unix FROM user_sessions \
                     WHERE session_identifier = $1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(session_identifier)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up user session")?;

        let Some(row) = row else { return Ok(None) };
        let session_id: Uuid = row.get("id");
        Ok(Some(UserSession {
            id: session_id,
            session_identifier: row.get("session_identifier"),
            user_id: row.get("user_id"),
            auth_methods: row.get("auth_methods"),
            acr_level: acr_from_row(&row, "acr_level")?,
            started_at_unix: row.get("started_at_unix"),
            last_accessed_unix: row.get("last_accessed_unix"),
            clients: self.session_clients(session_id).await?,
        }))
    }

    async fn create_user_session(&self, session: &UserSession) -> Result<()> {
        let query = "INSERT INTO user_sessions \
             (id, session_identifier, user_id, auth_methods, acr_level, \
              started_at_unix, last_accessed_unix) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)";
        let span = query_span("INSERT", query);
        sqlx::query(query)
            .bind(session.id)
            .bind(&session.session_identifier)
            .bind(session.user_id)
            .bind(&session.auth_methods)
            .bind(i16::from(session.acr_level.level()))
            .bind(session.started_at_unix)
            .bind(session.last_accessed_unix)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert user session")?;

        self.replace_session_clients(session).await
    }

    async fn update_user_session(&self, session: &UserSession) -> Result<()> {
        let query = "UPDATE user_sessions SET auth_methods = $2, acr_level = $3, \
                     last_accessed_unix = $4 WHERE id = $1";
        let span = query_span("UPDATE", query);
        sqlx::query(query)
            .bind(session.id)
            .bind(&session.auth_methods)
            .bind(i16::from(session.acr_level.level()))
            .bind(session.last_accessed_unix)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update user session")?;

        self.replace_session_clients(session).await
    }

    async fn get_user_consent(
        &self,
        user_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<UserConsent>> {
        let query = "SELECT id, user_id, client_id, scope, granted_at_unix \
                     FROM user_consents WHERE user_id = $1 AND client_id = $2";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up user consent")?;

        Ok(row.map(|row| UserConsent {
            id: row.get("id"),
            user_id: row.get("user_id"),
            client_id: row.get("client_id"),
            scope: row.get("scope"),
            granted_at_unix: row.get("granted_at_unix"),
        }))
    }

    async fn save_user_consent(&self, consent: &UserConsent) -> Result<()> {
        let query = "INSERT INTO user_consents (id, user_id, client_id, scope, granted_at_unix) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, client_id) \
             DO UPDATE SET scope = EXCLUDED.scope, granted_at_unix = EXCLUDED.granted_at_unix";
        let span = query_span("INSERT", query);
        sqlx::query(query)
            .bind(consent.id)
            .bind(consent.user_id)
            .bind(consent.client_id)
            .bind(&consent.scope)
            .bind(consent.granted_at_unix)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save user consent")?;
        Ok(())
    }
}
