//! Shared fixtures: demo entity types and schema for integration tests.
#![allow(dead_code)]

use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use stagehand_core::{
    apply_schema, open_db, open_db_in_memory, Entity, RelatedRow, RelationDef, RelationKind,
    StoreResult,
};
use std::path::Path;
use uuid::Uuid;

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS tblUserType (
    user_type_id INTEGER PRIMARY KEY,
    type_name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tblUser (
    user_id TEXT PRIMARY KEY,
    user_type_id INTEGER NOT NULL REFERENCES tblUserType(user_type_id),
    user_name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tblLogin (
    login_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES tblUser(user_id),
    logged_at INTEGER NOT NULL
);
";

pub fn open_store_in_memory() -> Connection {
    let conn = open_db_in_memory().unwrap();
    apply_schema(&conn, SCHEMA_SQL).unwrap();
    conn
}

pub fn open_store_at(path: impl AsRef<Path>) -> Connection {
    let conn = open_db(path).unwrap();
    apply_schema(&conn, SCHEMA_SQL).unwrap();
    conn
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserType {
    pub user_type_id: i64,
    pub type_name: String,
    /// Populated only by eager loading of the `users` relation.
    pub users: Vec<User>,
}

impl UserType {
    pub fn new(user_type_id: i64, type_name: impl Into<String>) -> Self {
        Self {
            user_type_id,
            type_name: type_name.into(),
            users: Vec::new(),
        }
    }
}

impl Entity for UserType {
    const TABLE: &'static str = "tblUserType";
    const COLUMNS: &'static [&'static str] = &["user_type_id", "type_name"];
    const KEY_COLUMN: &'static str = "user_type_id";

    fn key_value(&self) -> Value {
        Value::Integer(self.user_type_id)
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.user_type_id),
            Value::Text(self.type_name.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> StoreResult<Self> {
        Ok(Self {
            user_type_id: row.get("user_type_id")?,
            type_name: row.get("type_name")?,
            users: Vec::new(),
        })
    }

    fn relations() -> &'static [RelationDef] {
        &[RelationDef {
            name: "users",
            kind: RelationKind::HasMany,
            target_table: "tblUser",
            target_columns: &["user_id", "user_type_id", "user_name"],
            local_column: "user_type_id",
            target_join_column: "user_type_id",
        }]
    }

    fn attach_related(&mut self, relation: &'static str, rows: Vec<RelatedRow>) {
        if relation == "users" {
            self.users = rows.into_iter().map(|row| user_from_related(&row)).collect();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: String,
    pub user_type_id: i64,
    pub user_name: String,
    /// Populated only by eager loading of the `user_type` relation.
    pub user_type: Option<UserType>,
    /// Populated only by eager loading of the `logins` relation.
    pub logins: Vec<Login>,
}

impl User {
    pub fn new(user_type_id: i64, user_name: impl Into<String>) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            user_type_id,
            user_name: user_name.into(),
            user_type: None,
            logins: Vec::new(),
        }
    }
}

impl Entity for User {
    const TABLE: &'static str = "tblUser";
    const COLUMNS: &'static [&'static str] = &["user_id", "user_type_id", "user_name"];
    const KEY_COLUMN: &'static str = "user_id";

    fn key_value(&self) -> Value {
        Value::Text(self.user_id.clone())
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.user_id.clone()),
            Value::Integer(self.user_type_id),
            Value::Text(self.user_name.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> StoreResult<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            user_type_id: row.get("user_type_id")?,
            user_name: row.get("user_name")?,
            user_type: None,
            logins: Vec::new(),
        })
    }

    fn relations() -> &'static [RelationDef] {
        &[
            RelationDef {
                name: "user_type",
                kind: RelationKind::BelongsTo,
                target_table: "tblUserType",
                target_columns: &["user_type_id", "type_name"],
                local_column: "user_type_id",
                target_join_column: "user_type_id",
            },
            RelationDef {
                name: "logins",
                kind: RelationKind::HasMany,
                target_table: "tblLogin",
                target_columns: &["login_id", "user_id", "logged_at"],
                local_column: "user_id",
                target_join_column: "user_id",
            },
        ]
    }

    fn attach_related(&mut self, relation: &'static str, rows: Vec<RelatedRow>) {
        match relation {
            "user_type" => {
                self.user_type = rows.first().map(|row| UserType {
                    user_type_id: int(&row.values[0]),
                    type_name: text(&row.values[1]),
                    users: Vec::new(),
                });
            }
            "logins" => {
                self.logins = rows
                    .into_iter()
                    .map(|row| Login {
                        login_id: text(&row.values[0]),
                        user_id: text(&row.values[1]),
                        logged_at: int(&row.values[2]),
                    })
                    .collect();
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Login {
    pub login_id: String,
    pub user_id: String,
    pub logged_at: i64,
}

impl Login {
    pub fn new(user_id: impl Into<String>, logged_at: i64) -> Self {
        Self {
            login_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            logged_at,
        }
    }
}

impl Entity for Login {
    const TABLE: &'static str = "tblLogin";
    const COLUMNS: &'static [&'static str] = &["login_id", "user_id", "logged_at"];
    const KEY_COLUMN: &'static str = "login_id";

    fn key_value(&self) -> Value {
        Value::Text(self.login_id.clone())
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.login_id.clone()),
            Value::Text(self.user_id.clone()),
            Value::Integer(self.logged_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> StoreResult<Self> {
        Ok(Self {
            login_id: row.get("login_id")?,
            user_id: row.get("user_id")?,
            logged_at: row.get("logged_at")?,
        })
    }
}

fn user_from_related(row: &RelatedRow) -> User {
    User {
        user_id: text(&row.values[0]),
        user_type_id: int(&row.values[1]),
        user_name: text(&row.values[2]),
        user_type: None,
        logins: Vec::new(),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        other => panic!("expected text value, got {other:?}"),
    }
}

fn int(value: &Value) -> i64 {
    match value {
        Value::Integer(i) => *i,
        other => panic!("expected integer value, got {other:?}"),
    }
}
