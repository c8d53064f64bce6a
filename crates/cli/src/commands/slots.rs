use std::collections::BTreeSet;

use chrono::{NaiveDate, Utc};
use medidesk_core::scheduling::AppointmentStore;
use medidesk_db::{connect_from_config, migrations, SqlAppointmentStore};

use crate::commands::{current_thread_runtime, load_config, CommandResult};

pub fn run(date: &str) -> CommandResult {
    let Ok(date) = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d") else {
        return CommandResult::failure("slots", "validation", "date must be YYYY-MM-DD", 2);
    };
    let today = Utc::now().date_naive();

    let config = match load_config() {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("slots", error),
    };
    let allocator = match config.scheduling.allocator() {
        Ok(allocator) => allocator,
        Err(error) => return CommandResult::config_failure("slots", error),
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::runtime_failure("slots", error),
    };

    let booked = runtime.block_on(async {
        if date < today {
            return Ok(BTreeSet::new());
        }
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let store = SqlAppointmentStore::new(pool.clone());
        let booked = store
            .list_appointments(date)
            .await
            .map_err(|error| ("persistence", error.to_string(), 5u8));
        pool.close().await;
        booked
    });

    let booked = match booked {
        Ok(booked) => booked,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("slots", error_class, message, exit_code);
        }
    };

    match allocator.available_slots_from(date, today, &booked) {
        Ok(slots) if slots.is_empty() => {
            CommandResult::success("slots", format!("no free slots on {date}"))
        }
        Ok(slots) => {
            let labels: Vec<String> = slots.iter().map(|slot| slot.start_label()).collect();
            CommandResult::success(
                "slots",
                format!("{} free slots on {date}: {}", slots.len(), labels.join(", ")),
            )
        }
        Err(error) => CommandResult::failure("slots", "validation", error.to_string(), 2),
    }
}
