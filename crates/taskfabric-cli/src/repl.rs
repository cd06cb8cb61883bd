//! Interactive REPL loop.

use std::io::Write;

use anyhow::Result;

use taskfabric_exec::Session;
use taskfabric_store::{WorkPayload, kind};

const HELP: &str = "commands:\n  \
    /work <message>            run in the background\n  \
    /at <iso8601> <message>    run at a time\n  \
    /every <seconds> <message> run on a recurring interval\n  \
    /tasks                     list work tasks\n  \
    /help                      show this help\n  \
    /quit                      exit\n\
    anything else is sent down the main path";

/// Drive the REPL until EOF or `/quit`.
pub async fn run(mut session: Session) -> Result<()> {
    session.start_workers()?;
    println!("taskfabric demo — type /help for commands");

    loop {
        for note in session.drain_notifications().await? {
            println!("[notify] {note}");
        }

        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = read_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ') {
            _ if line == "/quit" || line == "/exit" => break,
            _ if line == "/help" => println!("{HELP}"),
            _ if line == "/tasks" => list_tasks(&session).await?,
            Some(("/work", message)) => {
                let task_id = session
                    .create_work_task(work_payload(message), None, None, false)
                    .await?;
                println!("queued work task {task_id}");
            }
            Some(("/at", rest)) => match rest.split_once(' ') {
                Some((when, message)) => {
                    match session
                        .create_work_task(work_payload(message), Some(when), None, false)
                        .await
                    {
                        Ok(task_id) => println!("scheduled task {task_id} for {when}"),
                        Err(e) => println!("error: {e}"),
                    }
                }
                None => println!("usage: /at <iso8601> <message>"),
            },
            Some(("/every", rest)) => match rest.split_once(' ') {
                Some((seconds, message)) => match seconds.parse::<i64>() {
                    Ok(seconds) => {
                        let task_id = session
                            .create_work_task(work_payload(message), None, Some(seconds), true)
                            .await?;
                        println!("recurring task {task_id} (interval clamped to >= 1h)");
                    }
                    Err(_) => println!("usage: /every <seconds> <message>"),
                },
                None => println!("usage: /every <seconds> <message>"),
            },
            _ => {
                let result = session.send_message(&line, false).await?;
                match result.error {
                    Some(error) => println!("[{}] {}", error.code, error.message),
                    None => println!("{}", result.message.unwrap_or_default()),
                }
            }
        }
    }

    session.stop_workers();
    Ok(())
}

fn work_payload(message: &str) -> WorkPayload {
    WorkPayload {
        message: message.to_string(),
        ..WorkPayload::default()
    }
}

async fn list_tasks(session: &Session) -> Result<()> {
    let tasks = session.state().tasks().list(Some(kind::WORK), None).await?;
    if tasks.is_empty() {
        println!("no work tasks");
        return Ok(());
    }
    for task in tasks {
        println!(
            "{}  {:<8} {}",
            task.task_id,
            task.state,
            task.message().unwrap_or("")
        );
    }
    Ok(())
}

/// Read one line from stdin off the async runtime; `None` on EOF.
async fn read_line() -> Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| {
        let mut buffer = String::new();
        std::io::stdin().read_line(&mut buffer).map(|n| (n, buffer))
    })
    .await??;
    Ok(match line {
        (0, _) => None,
        (_, buffer) => Some(buffer),
    })
}
