use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::matcher::{self, Exclusions};
use crate::utils::generate_invite_code;

const MAX_NAME_LEN: usize = 64;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_BUDGET_LEN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub group_id: Uuid,
    pub name: String,
    pub description: String,
    pub budget: String,
    pub invite_code: String,
    pub owner_id: Uuid,
    pub is_drawn: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ParticipantInfo {
    pub participant_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct GroupDetail {
    #[serde(flatten)]
    pub group: Group,
    pub participants: Vec<ParticipantInfo>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub budget: String,
}

/// 通过邀请码或群组ID加入，至少提供一个
#[derive(Debug, Deserialize)]
pub struct JoinGroupRequest {
    pub invite_code: Option<String>,
    pub group_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct GroupIdRequest {
    pub group_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct DrawResponse {
    pub group_id: Uuid,
    pub assignments: usize,
}

#[derive(Debug, Serialize, FromRow)]
pub struct AssignmentInfo {
    pub giver_id: Uuid,
    pub receiver_id: Uuid,
    pub receiver_name: String,
}

impl CreateGroupRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let name_len = self.name.trim().chars().count();
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return Err(AppError::Validation(format!(
                "group name must be between 1 and {} characters",
                MAX_NAME_LEN
            )));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(AppError::Validation(format!(
                "description must be at most {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }
        if self.budget.chars().count() > MAX_BUDGET_LEN {
            return Err(AppError::Validation(format!(
                "budget must be at most {} characters",
                MAX_BUDGET_LEN
            )));
        }
        Ok(())
    }
}

const GROUP_COLUMNS: &str =
    "group_id, name, description, budget, invite_code, owner_id, is_drawn, created_at";

/// 返回调用者在该群组中的参与者ID
pub async fn participant_id(
    pool: &PgPool,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<Uuid, AppError> {
    sqlx::query_scalar(
        r#"
        SELECT participant_id FROM participants
        WHERE group_id = $1 AND user_id = $2
        "#,
    )
    .bind(group_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotAMember)
}

/// 锁定群组行并校验群主身份以及尚未抽签。
///
/// 抽签和排除规则的修改都先调用它，同一群组上的这些操作因此串行执行。
pub async fn lock_owned_group(
    conn: &mut PgConnection,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<Group, AppError> {
    let group = sqlx::query_as::<_, Group>(&format!(
        "SELECT {} FROM groups WHERE group_id = $1 FOR UPDATE",
        GROUP_COLUMNS
    ))
    .bind(group_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("group"))?;

    if group.owner_id != user_id {
        return Err(AppError::Forbidden(
            "only the group owner can do this".into(),
        ));
    }
    if group.is_drawn {
        return Err(AppError::AlreadyDrawn);
    }
    Ok(group)
}

impl Group {
    pub async fn create(
        pool: &PgPool,
        owner_id: Uuid,
        req: CreateGroupRequest,
    ) -> Result<Self, AppError> {
        let mut tx = pool.begin().await?;

        let group = sqlx::query_as::<_, Group>(&format!(
            r#"
            INSERT INTO groups (group_id, name, description, budget, invite_code, owner_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            GROUP_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(req.name.trim())
        .bind(req.description.trim())
        .bind(req.budget.trim())
        .bind(generate_invite_code())
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;

        // 群主是第一个参与者
        sqlx::query(
            r#"
            INSERT INTO participants (participant_id, group_id, user_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(group.group_id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!("Group {} created by {}", group.group_id, owner_id);
        Ok(group)
    }

    pub async fn find_by_id(pool: &PgPool, group_id: Uuid) -> Result<Option<Self>, AppError> {
        let group = sqlx::query_as::<_, Group>(&format!(
            "SELECT {} FROM groups WHERE group_id = $1",
            GROUP_COLUMNS
        ))
        .bind(group_id)
        .fetch_optional(pool)
        .await?;

        Ok(group)
    }

    pub async fn find_by_invite_code(
        pool: &PgPool,
        invite_code: &str,
    ) -> Result<Option<Self>, AppError> {
        let group = sqlx::query_as::<_, Group>(&format!(
            "SELECT {} FROM groups WHERE invite_code = $1",
            GROUP_COLUMNS
        ))
        .bind(invite_code.trim().to_lowercase())
        .fetch_optional(pool)
        .await?;

        Ok(group)
    }

    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, AppError> {
        let groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT g.group_id, g.name, g.description, g.budget, g.invite_code,
                   g.owner_id, g.is_drawn, g.created_at
            FROM groups g
            JOIN participants p ON p.group_id = g.group_id
            WHERE p.user_id = $1
            ORDER BY g.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(groups)
    }

    pub async fn members(pool: &PgPool, group_id: Uuid) -> Result<Vec<ParticipantInfo>, AppError> {
        let members = sqlx::query_as::<_, ParticipantInfo>(
            r#"
            SELECT p.participant_id, p.user_id, u.name, p.joined_at
            FROM participants p
            JOIN users u ON u.user_id = p.user_id
            WHERE p.group_id = $1
            ORDER BY p.joined_at, p.participant_id
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;

        Ok(members)
    }

    pub async fn join(pool: &PgPool, user_id: Uuid, req: JoinGroupRequest) -> Result<Self, AppError> {
        let target = match (req.group_id, req.invite_code.as_deref()) {
            (Some(group_id), _) => Self::find_by_id(pool, group_id).await?,
            (None, Some(code)) => Self::find_by_invite_code(pool, code).await?,
            (None, None) => {
                return Err(AppError::Validation(
                    "invite_code or group_id is required".into(),
                ));
            }
        }
        .ok_or(AppError::NotFound("group"))?;

        let mut tx = pool.begin().await?;

        // 与抽签互斥
        let group = sqlx::query_as::<_, Group>(&format!(
            "SELECT {} FROM groups WHERE group_id = $1 FOR UPDATE",
            GROUP_COLUMNS
        ))
        .bind(target.group_id)
        .fetch_one(&mut *tx)
        .await?;

        if group.is_drawn {
            return Err(AppError::AlreadyDrawn);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO participants (participant_id, group_id, user_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(group.group_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::Conflict("already a member of this group".into()));
        }

        tx.commit().await?;
        tracing::info!("User {} joined group {}", user_id, group.group_id);
        Ok(group)
    }

    /// 删除群组，参与者、排除规则、配对和聊天记录随外键级联删除
    pub async fn delete(pool: &PgPool, group_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        let mut tx = pool.begin().await?;

        let owner_id: Uuid = sqlx::query_scalar(
            "SELECT owner_id FROM groups WHERE group_id = $1 FOR UPDATE",
        )
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("group"))?;

        if owner_id != user_id {
            return Err(AppError::Forbidden(
                "only the group owner can delete the group".into(),
            ));
        }

        sqlx::query("DELETE FROM groups WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!("Group {} deleted by {}", group_id, user_id);
        Ok(())
    }

    /// 抽签并保存结果，返回生成的配对数
    pub async fn draw(pool: &PgPool, group_id: Uuid, user_id: Uuid) -> Result<usize, AppError> {
        let mut tx = pool.begin().await?;
        lock_owned_group(&mut *tx, group_id, user_id).await?;

        let participants: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT participant_id FROM participants
            WHERE group_id = $1
            ORDER BY joined_at, participant_id
            "#,
        )
        .bind(group_id)
        .fetch_all(&mut *tx)
        .await?;

        let exclusions: Exclusions = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT participant_a, participant_b FROM exclusions
            WHERE group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let assignment = matcher::draw(&participants, &exclusions).inspect_err(|e| {
            tracing::warn!("Draw failed for group {}: {}", group_id, e);
        })?;

        for (giver_id, receiver_id) in assignment.iter() {
            sqlx::query(
                r#"
                INSERT INTO assignments (assignment_id, group_id, giver_id, receiver_id)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(group_id)
            .bind(giver_id)
            .bind(receiver_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE groups SET is_drawn = TRUE WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(
            "Group {} drawn: {} participants, {} exclusions",
            group_id,
            participants.len(),
            exclusions.len()
        );
        Ok(assignment.len())
    }

    pub async fn my_assignment(
        pool: &PgPool,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<AssignmentInfo, AppError> {
        let participant_id = participant_id(pool, group_id, user_id).await?;

        sqlx::query_as::<_, AssignmentInfo>(
            r#"
            SELECT a.giver_id, a.receiver_id, u.name AS receiver_name
            FROM assignments a
            JOIN participants p ON p.participant_id = a.receiver_id
            JOIN users u ON u.user_id = p.user_id
            WHERE a.group_id = $1 AND a.giver_id = $2
            "#,
        )
        .bind(group_id)
        .bind(participant_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::DrawNotPerformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> CreateGroupRequest {
        CreateGroupRequest {
            name: name.into(),
            description: String::new(),
            budget: "50 EUR".into(),
        }
    }

    #[test]
    fn test_create_group_validation() {
        assert!(request("Office party").validate().is_ok());
        assert!(matches!(request("   ").validate(), Err(AppError::Validation(_))));
        assert!(matches!(
            request(&"x".repeat(MAX_NAME_LEN + 1)).validate(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_join_request_accepts_either_key() {
        let by_code: JoinGroupRequest = serde_json::from_str(r#"{"invite_code":"a1b2c3d4"}"#).unwrap();
        assert_eq!(by_code.invite_code.as_deref(), Some("a1b2c3d4"));
        assert!(by_code.group_id.is_none());

        let id = Uuid::new_v4();
        let by_id: JoinGroupRequest =
            serde_json::from_str(&format!(r#"{{"group_id":"{}"}}"#, id)).unwrap();
        assert_eq!(by_id.group_id, Some(id));
    }

    #[test]
    fn test_group_detail_flattens_group() {
        let detail = GroupDetail {
            group: Group {
                group_id: Uuid::new_v4(),
                name: "Family".into(),
                description: String::new(),
                budget: String::new(),
                invite_code: "deadbeef".into(),
                owner_id: Uuid::new_v4(),
                is_drawn: false,
                created_at: Utc::now(),
            },
            participants: Vec::new(),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["invite_code"], "deadbeef");
        assert!(json["participants"].as_array().unwrap().is_empty());
    }
}
