//! Single-file migration source
//!
//! All migrations live in one sql file that is embedded into the binary. A migration
//! starts with a header comment naming its version and description:
//! ```text
//! --##1 initial schema
//! ```
//! Versions must increase. Comment lines before the first header are ignored.
use std::{borrow::Cow, future::Future, pin::Pin};

use sqlx::{
    error::BoxDynError,
    migrate::{Migration, MigrationSource, MigrationType},
};

const HEADER: &str = "--##";

#[derive(Debug)]
pub struct MigrationScript<'s> {
    data: &'s str,
}

impl<'s> MigrationScript<'s> {
    fn parse(&self) -> Result<Vec<Migration>, String> {
        let mut result: Vec<Migration> = Vec::new();

        for line in self.data.lines().filter(|line| !line.trim().is_empty()) {
            if let Some(header) = line.strip_prefix(HEADER) {
                let (version, description) = header.split_once(' ').unwrap_or((header, ""));
                let version: i64 = version.parse().map_err(|e| {
                    format!("cannot parse migration version '{}': {}", version, e)
                })?;
                if let Some(previous) = result.last() {
                    if previous.version >= version {
                        return Err(format!(
                            "migration {} must be newer than migration {}",
                            version, previous.version
                        ));
                    }
                }

                result.push(Migration::new(
                    version,
                    Cow::Owned(description.trim().to_owned()),
                    MigrationType::Simple,
                    Cow::Owned(String::new()),
                ));
                continue;
            }

            match result.last_mut() {
                Some(migration) => {
                    let sql = migration.sql.to_mut();
                    sql.push_str(line);
                    sql.push('\n');
                }
                None if line.starts_with("--") => {}
                None => {
                    return Err(format!(
                        "migration script does not start with a header, got: {}",
                        line
                    ))
                }
            }
        }

        Ok(result)
    }
}

impl<'s> MigrationSource<'s> for MigrationScript<'s> {
    fn resolve(
        self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Migration>, BoxDynError>> + Send + 's>> {
        Box::pin(async move { Ok(self.parse()?) })
    }
}

pub fn postgresql_migrations() -> MigrationScript<'static> {
    MigrationScript {
        data: include_str!("./sql/migrations.pg.sql"),
    }
}
