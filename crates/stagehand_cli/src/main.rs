//! Demo console for the repository / unit-of-work core.
//!
//! # Responsibility
//! - Exercise the full flow against a throwaway database: stage an
//!   insert through a repository, commit, then read it back through a
//!   second unit of work.
//! - Keep output deterministic for quick local sanity checks.

use rusqlite::types::Value;
use rusqlite::Row;
use serde::Serialize;
use stagehand_core::{
    apply_schema, core_version, open_db, Entity, StoreResult, UnitOfWork,
};
use std::error::Error;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS tblUserType (
    user_type_id INTEGER PRIMARY KEY,
    type_name TEXT NOT NULL
);
";

#[derive(Debug, Clone, Serialize)]
struct UserType {
    user_type_id: i64,
    type_name: String,
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
        })
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let db_path = std::env::temp_dir().join("stagehand-demo.db");

    let conn = open_db(&db_path)?;
    apply_schema(&conn, SCHEMA_SQL)?;

    let uow = UnitOfWork::new(conn);
    let user_types = uow.repository::<UserType>()?;
    if user_types.get_by_id(6i64)?.is_none() {
        user_types.insert(UserType {
            user_type_id: 6,
            type_name: "kushan".to_string(),
        })?;
        uow.save_changes()?;
    }
    uow.dispose();

    // A fresh unit of work over the same storage proves the commit stuck.
    let fresh = UnitOfWork::new(open_db(&db_path)?);
    let loaded = fresh.repository::<UserType>()?.get_by_id(6i64)?;

    println!("stagehand_core version={}", core_version());
    match loaded {
        Some(user_type) => {
            println!("tblUserType[6]={}", serde_json::to_string(&user_type)?)
        }
        None => println!("tblUserType[6]=<absent>"),
    }

    Ok(())
}
