use crate::commands::{run_with_pool, CommandResult};

pub fn run() -> CommandResult {
    // Opening the pool applies pending migrations.
    match run_with_pool("migrate", |_config, _pool| async { Ok(()) }) {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => failure,
    }
}
