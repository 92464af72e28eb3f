//! User lookups. Accounts are created by the external registration flow;
//! `insert_user` exists for bootstrap and tests.

use rusqlite::{Connection, OptionalExtension};

use super::models::{now_timestamp, Role, User};

const USER_COLUMNS: &str = "id, display_name, email, avatar, role, created_at";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(4)?;
    Ok(User {
        id: row.get(0)?,
        display_name: row.get(1)?,
        email: row.get(2)?,
        avatar: row.get(3)?,
        role: Role::parse(&role).unwrap_or_default(),
        created_at: row.get(5)?,
    })
}

pub fn find_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        rusqlite::params![user_id],
        row_to_user,
    )
    .optional()
}

pub fn find_users(conn: &Connection, ids: &[&str]) -> rusqlite::Result<Vec<User>> {
    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = find_user(conn, id)? {
            users.push(user);
        }
    }
    Ok(users)
}

/// Insert a user with a fresh UUIDv7 id. Returns the stored record.
pub fn insert_user(
    conn: &Connection,
    display_name: &str,
    email: Option<&str>,
    avatar: Option<&str>,
    role: Role,
) -> rusqlite::Result<User> {
    let user = User {
        id: uuid::Uuid::now_v7().to_string(),
        display_name: display_name.to_string(),
        email: email.map(str::to_string),
        avatar: avatar.map(str::to_string),
        role,
        created_at: now_timestamp(),
    };
    conn.execute(
        &format!("INSERT INTO users ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", USER_COLUMNS),
        rusqlite::params![
            user.id,
            user.display_name,
            user.email,
            user.avatar,
            user.role.as_str(),
            user.created_at,
        ],
    )?;
    Ok(user)
}
