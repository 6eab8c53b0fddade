use bastion_core::config::LoadOptions;
use bastion_db::{connection::connect_with_config, migrations};
use serde_json::json;

use crate::commands::{load_config, runtime_for, CommandResult};

enum MigrateFailure {
    Connect(String),
    Apply(String),
}

impl MigrateFailure {
    fn into_result(self) -> CommandResult {
        match self {
            Self::Connect(message) => CommandResult::failure("migrate", "db_connectivity", message, 4),
            Self::Apply(message) => CommandResult::failure("migrate", "migration", message, 5),
        }
    }
}

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("migrate", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime_for("migrate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let applied = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| MigrateFailure::Connect(error.to_string()))?;
        let outcome = migrations::run_pending(&pool)
            .await
            .map_err(|error| MigrateFailure::Apply(error.to_string()));
        pool.close().await;
        outcome
    });

    if let Err(failure) = applied {
        return failure.into_result();
    }

    let known: Vec<_> = migrations::MIGRATOR
        .iter()
        .filter(|migration| migration.migration_type.is_up_migration())
        .map(|migration| json!({ "version": migration.version, "description": migration.description }))
        .collect();
    CommandResult::success_with_data(
        "migrate",
        format!("schema is at migration {}", known.len()),
        Some(json!({ "database_url": config.database.url, "migrations": known })),
    )
}
