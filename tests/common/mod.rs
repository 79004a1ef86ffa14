//! 数据库测试共用的数据准备
#![allow(dead_code)]

use sqlx::PgPool;
use uuid::Uuid;

use santa_backend::routes::group::{CreateGroupRequest, Group, JoinGroupRequest};

pub async fn insert_user(pool: &PgPool, name: &str) -> Uuid {
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (user_id, name, password_hash) VALUES ($1, $2, 'x')")
        .bind(user_id)
        .bind(name)
        .execute(pool)
        .await
        .unwrap();
    user_id
}

/// 第一个用户是群主
pub async fn group_with_members(pool: &PgPool, members: usize) -> (Group, Vec<Uuid>) {
    let owner = insert_user(pool, "owner").await;
    let group = Group::create(
        pool,
        owner,
        CreateGroupRequest {
            name: "Office".into(),
            description: String::new(),
            budget: "20".into(),
        },
    )
    .await
    .unwrap();

    let mut users = vec![owner];
    for i in 1..members {
        let user = insert_user(pool, &format!("member{}", i)).await;
        Group::join(
            pool,
            user,
            JoinGroupRequest {
                invite_code: Some(group.invite_code.clone()),
                group_id: None,
            },
        )
        .await
        .unwrap();
        users.push(user);
    }
    (group, users)
}

pub async fn assignments(pool: &PgPool, group_id: Uuid) -> Vec<(Uuid, Uuid)> {
    sqlx::query_as("SELECT giver_id, receiver_id FROM assignments WHERE group_id = $1 ORDER BY giver_id")
        .bind(group_id)
        .fetch_all(pool)
        .await
        .unwrap()
}

pub async fn count_rows(pool: &PgPool, table: &str, group_id: Uuid) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE group_id = $1", table))
        .bind(group_id)
        .fetch_one(pool)
        .await
        .unwrap()
}
