use axum::{
    extract::{FromRequestParts, Path},
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::Role;

use super::jwt::decode_session_token;

/// Header selecting the household a root-level call acts on. Optional when
/// the caller belongs to exactly one household.
pub const HOUSEHOLD_HEADER: &str = "x-household-id";

/// JWT secret wrapper for request extensions
#[derive(Clone)]
pub struct JwtSecret(pub String);

/// Extractor for authenticated users. Validates the bearer token and checks
/// the account still exists.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Unauthorized)?;

        let jwt_secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or(AppError::Internal("JWT secret not configured".to_string()))?;

        let claims = decode_session_token(bearer.token(), &jwt_secret.0)?;

        let pool = parts.extensions.get::<SqlitePool>().ok_or(AppError::Internal(
            "Database pool not configured".to_string(),
        ))?;

        // Reject tokens for deleted accounts
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
            .bind(&claims.sub)
            .fetch_optional(pool)
            .await
            .map_err(|e| AppError::Internal(format!("Database error: {}", e)))?;

        if exists.is_none() {
            return Err(AppError::Unauthorized);
        }

        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

/// Caller acting inside a household. Root-level endpoints resolve the
/// household from the `x-household-id` header, falling back to the caller's
/// only membership.
#[derive(Debug, Clone)]
pub struct HouseholdMember {
    pub user_id: String,
    pub email: String,
    pub household_id: String,
    pub role: Role,
}

impl HouseholdMember {
    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }
}

async fn membership_role(
    pool: &SqlitePool,
    household_id: &str,
    user_id: &str,
) -> Result<Option<Role>, AppError> {
    let role: Option<String> = sqlx::query_scalar(
        "SELECT role FROM household_members WHERE household_id = ? AND user_id = ?",
    )
    .bind(household_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::Internal(format!("Database error: {}", e)))?;

    match role {
        Some(r) => Role::from_str(&r)
            .map(Some)
            .ok_or_else(|| AppError::Internal("Invalid role in database".to_string())),
        None => Ok(None),
    }
}

impl<S> FromRequestParts<S> for HouseholdMember
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_user = AuthUser::from_request_parts(parts, state).await?;

        let header_household = parts
            .headers
            .get(HOUSEHOLD_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let pool = parts
            .extensions
            .get::<SqlitePool>()
            .ok_or(AppError::Internal(
                "Database pool not configured".to_string(),
            ))?
            .clone();

        let (household_id, role) = match header_household {
            Some(household_id) => {
                let role = membership_role(&pool, &household_id, &auth_user.user_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Forbidden("No eres miembro de este hogar".to_string())
                    })?;
                (household_id, role)
            }
            None => {
                let memberships: Vec<(String, String)> = sqlx::query_as(
                    "SELECT household_id, role FROM household_members WHERE user_id = ?",
                )
                .bind(&auth_user.user_id)
                .fetch_all(&pool)
                .await
                .map_err(|e| AppError::Internal(format!("Database error: {}", e)))?;

                match memberships.len() {
                    0 => {
                        return Err(AppError::NotFound(
                            "No perteneces a ningún hogar".to_string(),
                        ))
                    }
                    1 => {
                        let (household_id, role_str) = memberships.into_iter().next().unwrap();
                        let role = Role::from_str(&role_str).ok_or_else(|| {
                            AppError::Internal("Invalid role in database".to_string())
                        })?;
                        (household_id, role)
                    }
                    _ => {
                        return Err(AppError::Validation(
                            "Debes indicar el hogar con el encabezado x-household-id".to_string(),
                        ))
                    }
                }
            }
        };

        Ok(HouseholdMember {
            user_id: auth_user.user_id,
            email: auth_user.email,
            household_id,
            role,
        })
    }
}

/// Member of the household named by the `{id}` path segment. Used by the
/// routes nested under `/households/{id}`.
#[derive(Debug, Clone)]
pub struct HouseholdPathMember(pub HouseholdMember);

impl<S> FromRequestParts<S> for HouseholdPathMember
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_user = AuthUser::from_request_parts(parts, state).await?;

        #[derive(Deserialize)]
        struct HouseholdPath {
            id: String,
        }

        let Path(path): Path<HouseholdPath> = parts
            .extract::<Path<HouseholdPath>>()
            .await
            .map_err(|_| AppError::Validation("Identificador de hogar inválido".to_string()))?;

        let pool = parts
            .extensions
            .get::<SqlitePool>()
            .ok_or(AppError::Internal(
                "Database pool not configured".to_string(),
            ))?
            .clone();

        let role = membership_role(&pool, &path.id, &auth_user.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Hogar no encontrado".to_string()))?;

        Ok(HouseholdPathMember(HouseholdMember {
            user_id: auth_user.user_id,
            email: auth_user.email,
            household_id: path.id,
            role,
        }))
    }
}
