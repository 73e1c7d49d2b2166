use axum::{extract::State, Json};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    config::{Config, EmailProvider},
    error::{AppError, AppResult},
    models::{
        AuditAction, AuditEntry, AuthResponse, CreateUser, ForgotPasswordRequest, LoginRequest,
        ResetPasswordRequest, ResourceType, User, UserResponse,
    },
    services::audit::{self, AuditHandle},
};

use super::{
    jwt::issue_session_token,
    middleware::AuthUser,
    password::{generate_reset_token, hash_password, verify_password},
};

pub async fn register(
    State(pool): State<SqlitePool>,
    State(jwt_secret): State<String>,
    State(audit): State<AuditHandle>,
    Json(input): Json<CreateUser>,
) -> AppResult<Json<AuthResponse>> {
    let attempt = AuditEntry::new(AuditAction::UserRegistered, ResourceType::User);

    let result = async {
        let email = input.email.trim().to_lowercase();

        tracing::info!(event = "auth.register.attempt", email = %email, "Registration attempt");

        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Validation("Correo electrónico inválido".to_string()));
        }
        if input.password.len() < 8 {
            return Err(AppError::Validation(
                "La contraseña debe tener al menos 8 caracteres".to_string(),
            ));
        }
        if input.display_name.trim().is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio".to_string()));
        }

        let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&pool)
            .await?;

        if existing.is_some() {
            return Err(AppError::Conflict("El correo ya está registrado".to_string()));
        }

        let password_hash = hash_password(&input.password)?;
        let user_id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO users (id, email, display_name, password_hash) VALUES (?, ?, ?, ?)")
            .bind(&user_id)
            .bind(&email)
            .bind(input.display_name.trim())
            .bind(&password_hash)
            .execute(&pool)
            .await?;

        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&user_id)
            .fetch_one(&pool)
            .await?;

        let token = issue_session_token(&user, &jwt_secret)?;

        audit.log(
            AuditEntry::new(AuditAction::UserRegistered, ResourceType::User)
                .user(&user.id)
                .resource(&user.id)
                .new_values(&json!({ "email": user.email, "display_name": user.display_name })),
        );

        tracing::info!(event = "auth.register.success", user_id = %user.id, "Registration successful");

        Ok(Json(AuthResponse {
            token,
            user: UserResponse::from(user),
        }))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

pub async fn login(
    State(pool): State<SqlitePool>,
    State(jwt_secret): State<String>,
    Json(input): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = input.email.trim().to_lowercase();

    tracing::info!(event = "auth.login.attempt", email = %email, "Login attempt");

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&pool)
        .await?;

    let user = match user {
        Some(u) => u,
        None => {
            // Login keeps the synchronous audit variant
            audit::log_sync(
                &pool,
                AuditEntry::new(AuditAction::UserLoginFailed, ResourceType::Session)
                    .failed("Usuario no encontrado"),
            )
            .await?;
            return Err(AppError::InvalidCredentials);
        }
    };

    let valid = verify_password(&input.password, &user.password_hash)?;
    if !valid {
        audit::log_sync(
            &pool,
            AuditEntry::new(AuditAction::UserLoginFailed, ResourceType::Session)
                .user(&user.id)
                .failed("Contraseña incorrecta"),
        )
        .await?;
        return Err(AppError::InvalidCredentials);
    }

    let token = issue_session_token(&user, &jwt_secret)?;

    audit::log_sync(
        &pool,
        AuditEntry::new(AuditAction::UserLoggedIn, ResourceType::Session)
            .user(&user.id)
            .resource(&user.id),
    )
    .await?;

    tracing::info!(event = "auth.login.success", user_id = %user.id, "Login successful");

    Ok(Json(AuthResponse {
        token,
        user: UserResponse::from(user),
    }))
}

pub async fn logout(auth: AuthUser, State(audit): State<AuditHandle>) -> AppResult<Json<Value>> {
    audit.log(
        AuditEntry::new(AuditAction::UserLoggedOut, ResourceType::Session)
            .user(&auth.user_id)
            .resource(&auth.user_id),
    );

    Ok(Json(json!({ "ok": true })))
}

pub async fn me(auth: AuthUser, State(pool): State<SqlitePool>) -> AppResult<Json<UserResponse>> {
    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&auth.user_id)
        .fetch_one(&pool)
        .await?;

    Ok(Json(UserResponse::from(user)))
}

pub async fn forgot_password(
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    State(audit): State<AuditHandle>,
    Json(input): Json<ForgotPasswordRequest>,
) -> AppResult<Json<Value>> {
    let attempt = AuditEntry::new(AuditAction::PasswordResetRequested, ResourceType::User);

    let result = async {
        let email = input.email.trim().to_lowercase();

        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&pool)
            .await?;

        // Always answer 200; the response never reveals whether the email exists
        if let Some(user) = user {
            let token = generate_reset_token();
            let expires_at = (chrono::Utc::now() + chrono::Duration::hours(1))
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string();

            sqlx::query(
                "INSERT INTO password_resets (token, user_id, expires_at) VALUES (?, ?, ?)",
            )
            .bind(&token)
            .bind(&user.id)
            .bind(&expires_at)
            .execute(&pool)
            .await?;

            let reset_link = format!("{}/reset-password?token={}", config.email.base_url, token);
            match config.email.provider {
                EmailProvider::Noop => {
                    tracing::info!(
                        event = "auth.reset.link",
                        user_id = %user.id,
                        "Password reset link (noop mailer): {}",
                        reset_link
                    );
                }
                // Mail delivery is a collaborator; smtp/sendgrid deployments wire
                // it in at the edge and only the noop provider ships here.
                EmailProvider::Smtp | EmailProvider::Sendgrid => {
                    tracing::warn!(
                        event = "auth.reset.link",
                        user_id = %user.id,
                        "Mail provider not wired, logging reset link: {}",
                        reset_link
                    );
                }
            }

            audit.log(
                AuditEntry::new(AuditAction::PasswordResetRequested, ResourceType::User)
                    .user(&user.id)
                    .resource(&user.id),
            );
        }

        Ok(Json(json!({ "ok": true })))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

pub async fn reset_password(
    State(pool): State<SqlitePool>,
    State(audit): State<AuditHandle>,
    Json(input): Json<ResetPasswordRequest>,
) -> AppResult<Json<Value>> {
    let attempt = AuditEntry::new(AuditAction::PasswordResetCompleted, ResourceType::User);

    let result = async {
        if input.new_password.len() < 8 {
            return Err(AppError::Validation(
                "La contraseña debe tener al menos 8 caracteres".to_string(),
            ));
        }

        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let reset: Option<(String, String)> = sqlx::query_as(
            "SELECT user_id, expires_at FROM password_resets WHERE token = ? AND used_at IS NULL",
        )
        .bind(&input.token)
        .fetch_optional(&pool)
        .await?;

        let (user_id, expires_at) = reset
            .ok_or_else(|| AppError::NotFound("Enlace de restablecimiento inválido".to_string()))?;

        if expires_at < now {
            return Err(AppError::Validation(
                "El enlace de restablecimiento expiró".to_string(),
            ));
        }

        let password_hash = hash_password(&input.new_password)?;

        let mut tx = pool.begin().await?;
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(&password_hash)
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE password_resets SET used_at = ? WHERE token = ?")
            .bind(&now)
            .bind(&input.token)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        audit.log(
            AuditEntry::new(AuditAction::PasswordResetCompleted, ResourceType::User)
                .user(&user_id)
                .resource(&user_id),
        );

        Ok(Json(json!({ "ok": true })))
    }
    .await;

    audit.log_failed_attempt(attempt, result)
}

/// Deletes the account. Households where the caller is the only member go
/// with it; households with other members require another owner first.
pub async fn delete_account(
    auth: AuthUser,
    State(pool): State<SqlitePool>,
) -> AppResult<Json<Value>> {
    let result = async {
        let owned: Vec<(String,)> = sqlx::query_as(
            "SELECT household_id FROM household_members WHERE user_id = ? AND role = 'owner'",
        )
        .bind(&auth.user_id)
        .fetch_all(&pool)
        .await?;

        let mut solo_households = Vec::new();
        for (household_id,) in owned {
            let others: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM household_members WHERE household_id = ? AND user_id != ?",
            )
            .bind(&household_id)
            .bind(&auth.user_id)
            .fetch_one(&pool)
            .await?;

            if others == 0 {
                solo_households.push(household_id);
                continue;
            }

            let other_owners: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM household_members
                 WHERE household_id = ? AND user_id != ? AND role = 'owner'",
            )
            .bind(&household_id)
            .bind(&auth.user_id)
            .fetch_one(&pool)
            .await?;

            if other_owners == 0 {
                return Err(AppError::Forbidden(
                    "Transfiere la propiedad del hogar antes de eliminar tu cuenta".to_string(),
                ));
            }
        }

        let mut tx = pool.begin().await?;
        for household_id in &solo_households {
            sqlx::query("DELETE FROM households WHERE id = ?")
                .bind(household_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(&auth.user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        // Account deletion keeps the synchronous audit variant
        audit::log_sync(
            &pool,
            AuditEntry::new(AuditAction::UserDeleted, ResourceType::User)
                .user(&auth.user_id)
                .resource(&auth.user_id),
        )
        .await?;

        tracing::info!(event = "auth.account.deleted", user_id = %auth.user_id, "Account deleted");

        Ok(Json(json!({ "deleted": true })))
    }
    .await;

    // Failed attempts land synchronously as well; the audit write itself
    // never masks the original error
    if let Err(e) = &result {
        audit::log_sync(
            &pool,
            AuditEntry::new(AuditAction::UserDeleted, ResourceType::User)
                .user(&auth.user_id)
                .failed(&e.to_string()),
        )
        .await
        .ok();
    }

    result
}
