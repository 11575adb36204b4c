//! Task command handlers

use anyhow::{bail, Context, Result};

use lodo_core::{Store, StoreError, TaskId, TaskInput};

use crate::output::Output;

/// Add a new task
pub fn add(store: &Store, text: String, output: &Output) -> Result<()> {
    let task = match store.save_task(TaskInput::new(text)) {
        Ok(task) => task,
        Err(StoreError::EmptyText) => bail!("Task text cannot be empty. Please enter a task."),
        Err(e) => return Err(e).context("Failed to save task"),
    };

    output.print_task(&task);
    output.success("Task added");
    Ok(())
}

/// List all tasks in creation order
pub fn list(store: &Store, output: &Output) -> Result<()> {
    let tasks = store.get_all_tasks().context("Failed to list tasks")?;
    output.print_tasks(&tasks);

    let pending = store.pending_count().context("Failed to count pending changes")?;
    if pending > 0 {
        output.message(&format!("{} change(s) awaiting sync", pending));
    }
    Ok(())
}

/// Edit a task's text
pub fn edit(store: &Store, id: TaskId, text: String, output: &Output) -> Result<()> {
    if store.get_task(id).context("Failed to look up task")?.is_none() {
        bail!("No task with id {}", id);
    }

    let task = match store.save_task(TaskInput::new(text).with_id(id)) {
        Ok(task) => task,
        Err(StoreError::EmptyText) => bail!("Task text cannot be empty. Please enter a task."),
        Err(e) => return Err(e).context("Failed to update task"),
    };

    output.print_task(&task);
    output.success("Task updated");
    Ok(())
}

/// Delete a task
pub fn delete(store: &Store, id: TaskId, output: &Output) -> Result<()> {
    store.delete_task(id).context("Failed to delete task")?;
    output.success(&format!("Task {} deleted", id));
    Ok(())
}

/// Delete all tasks and pending changes
pub fn clear(store: &Store, force: bool, output: &Output) -> Result<()> {
    if !force && output.should_prompt() {
        use std::io::{self, Write};

        print!("Delete all tasks and pending changes? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            output.message("Aborted.");
            return Ok(());
        }
    }

    store.clear().context("Failed to clear database")?;
    output.success("Database cleared");
    Ok(())
}
