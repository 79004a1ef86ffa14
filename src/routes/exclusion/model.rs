use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::routes::group::{Group, lock_owned_group};

#[derive(Debug, Serialize, FromRow)]
pub struct Exclusion {
    pub exclusion_id: Uuid,
    pub group_id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub created_at: DateTime<Utc>,
}

/// 排除规则中的一方
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ExclusionMember {
    pub participant_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
}

/// 列表返回的排除规则，带双方的用户信息
#[derive(Debug, Serialize)]
pub struct ExclusionDetail {
    pub exclusion_id: Uuid,
    pub group_id: Uuid,
    pub participant_a: ExclusionMember,
    pub participant_b: ExclusionMember,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ExclusionRow {
    exclusion_id: Uuid,
    group_id: Uuid,
    participant_a: Uuid,
    a_user_id: Uuid,
    a_name: String,
    participant_b: Uuid,
    b_user_id: Uuid,
    b_name: String,
    created_at: DateTime<Utc>,
}

impl From<ExclusionRow> for ExclusionDetail {
    fn from(row: ExclusionRow) -> Self {
        Self {
            exclusion_id: row.exclusion_id,
            group_id: row.group_id,
            participant_a: ExclusionMember {
                participant_id: row.participant_a,
                user_id: row.a_user_id,
                name: row.a_name,
            },
            participant_b: ExclusionMember {
                participant_id: row.participant_b,
                user_id: row.b_user_id,
                name: row.b_name,
            },
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateExclusionRequest {
    pub group_id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct DeleteExclusionRequest {
    pub group_id: Uuid,
    pub exclusion_id: Uuid,
}

impl Exclusion {
    pub async fn list(
        pool: &PgPool,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<ExclusionDetail>, AppError> {
        let group = Group::find_by_id(pool, group_id)
            .await?
            .ok_or(AppError::NotFound("group"))?;
        if group.owner_id != user_id {
            return Err(AppError::Forbidden(
                "only the group owner can view exclusions".into(),
            ));
        }

        let rows = sqlx::query_as::<_, ExclusionRow>(
            r#"
            SELECT e.exclusion_id, e.group_id,
                   e.participant_a, pa.user_id AS a_user_id, ua.name AS a_name,
                   e.participant_b, pb.user_id AS b_user_id, ub.name AS b_name,
                   e.created_at
            FROM exclusions e
            JOIN participants pa ON pa.participant_id = e.participant_a
            JOIN users ua ON ua.user_id = pa.user_id
            JOIN participants pb ON pb.participant_id = e.participant_b
            JOIN users ub ON ub.user_id = pb.user_id
            WHERE e.group_id = $1
            ORDER BY e.created_at, e.exclusion_id
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(ExclusionDetail::from).collect())
    }

    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        req: CreateExclusionRequest,
    ) -> Result<Self, AppError> {
        if req.participant_a == req.participant_b {
            return Err(AppError::Validation(
                "a participant cannot be excluded from themselves".into(),
            ));
        }

        let mut tx = pool.begin().await?;
        lock_owned_group(&mut *tx, req.group_id, user_id).await?;

        let members: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM participants
            WHERE group_id = $1 AND participant_id IN ($2, $3)
            "#,
        )
        .bind(req.group_id)
        .bind(req.participant_a)
        .bind(req.participant_b)
        .fetch_one(&mut *tx)
        .await?;
        if members != 2 {
            return Err(AppError::Validation(
                "both participants must belong to the group".into(),
            ));
        }

        // 排除关系是无序的，两个方向都算重复
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM exclusions
                WHERE group_id = $1
                  AND ((participant_a = $2 AND participant_b = $3)
                    OR (participant_a = $3 AND participant_b = $2))
            )
            "#,
        )
        .bind(req.group_id)
        .bind(req.participant_a)
        .bind(req.participant_b)
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            return Err(AppError::Conflict("exclusion already exists".into()));
        }

        let exclusion = sqlx::query_as::<_, Exclusion>(
            r#"
            INSERT INTO exclusions (exclusion_id, group_id, participant_a, participant_b)
            VALUES ($1, $2, $3, $4)
            RETURNING exclusion_id, group_id, participant_a, participant_b, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.group_id)
        .bind(req.participant_a)
        .bind(req.participant_b)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(
            "Exclusion {} added to group {}",
            exclusion.exclusion_id,
            exclusion.group_id
        );
        Ok(exclusion)
    }

    pub async fn delete(
        pool: &PgPool,
        user_id: Uuid,
        req: DeleteExclusionRequest,
    ) -> Result<(), AppError> {
        let mut tx = pool.begin().await?;
        lock_owned_group(&mut *tx, req.group_id, user_id).await?;

        let deleted = sqlx::query("DELETE FROM exclusions WHERE exclusion_id = $1 AND group_id = $2")
            .bind(req.exclusion_id)
            .bind(req.group_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound("exclusion"));
        }

        tx.commit().await?;
        Ok(())
    }
}
