use crate::error::CliError;
use model::task::{
    journal::JournalEntry,
    record::{TaskMode, TaskRecord},
};
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_task(task: &TaskRecord) {
    let progress = &task.progress;
    println!("{:<16} {}", "Task", task.id);
    println!("{:<16} {}", "Owner", task.owner);
    println!("{:<16} {}", "Status", task.status);
    println!("{:<16} {}", "Mode", describe_mode(&task.mode));
    println!("{:<16} {} -> {}", "Streams", task.source, task.target);
    println!(
        "{:<16} {} / {}",
        "Processed", progress.processed_count, progress.total
    );
    println!(
        "{:<16} {} items in {} sends",
        "Sent", progress.sent_items, progress.sent_units
    );
    println!("{:<16} {}", "Failed", progress.failed_count);
    println!("{:<16} {}", "Skipped", progress.skipped_count);
    println!("{:<16} {}", "Checkpoint", or_na(progress.last_checkpoint_id));
    if task.resume.is_resumed {
        println!("{:<16} {}", "Resumed from", or_na(task.resume.resume_from_id));
    }
    for (stream, cursor) in &task.tail_cursors {
        println!(
            "{:<16} {stream} last seen {}",
            "Cursor",
            or_na(cursor.last_seen_id)
        );
    }
    if progress.by_source.len() > 1 {
        for (stream, stats) in &progress.by_source {
            println!(
                "{:<16} {stream} processed {} sent {} failed {} skipped {}",
                "Source", stats.processed, stats.sent_items, stats.failed, stats.skipped
            );
        }
    }
    if let Some(error) = &task.error {
        println!("{:<16} {error}", "Error");
    }
    println!("{:<16} {}", "Updated", task.updated_at.to_rfc3339());
}

pub fn print_history(history: &[JournalEntry]) {
    println!();
    println!("History:");
    println!("-----------------------------");
    for entry in history {
        let from = entry
            .from
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<26} {:<10} -> {:<10} {}",
            entry.at.to_rfc3339(),
            from,
            entry.to,
            entry.note.as_deref().unwrap_or("")
        );
    }
}

pub fn print_list(tasks: &[TaskRecord]) {
    if tasks.is_empty() {
        println!("No tasks");
        return;
    }
    println!(
        "{:<38} {:<12} {:<10} {:<16} {}",
        "TASK", "OWNER", "STATUS", "PROCESSED", "MODE"
    );
    for task in tasks {
        let processed = format!("{}/{}", task.progress.processed_count, task.progress.total);
        println!(
            "{:<38} {:<12} {:<10} {:<16} {}",
            task.id,
            task.owner,
            task.status,
            processed,
            describe_mode(&task.mode)
        );
    }
}

fn describe_mode(mode: &TaskMode) -> String {
    match mode {
        TaskMode::Backfill { range } => match range.end_id {
            Some(end) => format!("backfill {}..{end}", range.start_id),
            None => format!("backfill {}..latest", range.start_id),
        },
        TaskMode::Tail { extra_sources } if extra_sources.is_empty() => "tail".to_string(),
        TaskMode::Tail { extra_sources } => format!("tail (+{} sources)", extra_sources.len()),
    }
}

fn or_na(id: Option<i64>) -> String {
    id.map(|id| id.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::task::record::IdRange;

    #[test]
    fn describes_open_and_closed_ranges() {
        let closed = TaskMode::Backfill {
            range: IdRange::bounded(100, 149),
        };
        let open = TaskMode::Backfill {
            range: IdRange::new(100, None),
        };
        assert_eq!(describe_mode(&closed), "backfill 100..149");
        assert_eq!(describe_mode(&open), "backfill 100..latest");
        assert_eq!(
            describe_mode(&TaskMode::Tail {
                extra_sources: vec!["b".into()]
            }),
            "tail (+1 sources)"
        );
    }
}
