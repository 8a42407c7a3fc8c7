//! Command execution.

use crate::Commands;
use colink_client::{Client, SessionEvent};
use colink_protocol::message::{AuthResult, FileTree, ProjectList, ProjectResult};
use colink_protocol::{CommandTag, ServerMessage};
use colored::Colorize;
use std::time::Duration;
use tokio::sync::broadcast;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub async fn execute(
    client: &Client,
    events: &mut broadcast::Receiver<SessionEvent>,
    cmd: &Commands,
    wait: Duration,
) -> CommandResult {
    match cmd {
        // Handled in main.rs before dispatching here
        Commands::Register { .. } | Commands::Watch => unreachable!(),

        Commands::Whoami => {
            client.request_user_info()?;
            match await_reply(events, CommandTag::UserInfo, wait).await? {
                ServerMessage::UserInfo(info) => Ok(format!(
                    "{}\n  Name: {}\n  Email: {}",
                    info.identifier.cyan().bold(),
                    info.display_name.as_deref().unwrap_or("-"),
                    info.email.as_deref().unwrap_or("-")
                )),
                other => Ok(format_event(&SessionEvent::Message(other))),
            }
        }

        Commands::Projects => {
            client.list_projects()?;
            match await_reply(events, CommandTag::ProjectList, wait).await? {
                ServerMessage::ProjectList(list) => Ok(format_projects(&list)),
                other => Ok(format_event(&SessionEvent::Message(other))),
            }
        }

        Commands::Files { project } => {
            client.list_files(project)?;
            match await_reply(events, CommandTag::FileTree, wait).await? {
                ServerMessage::FileTree(tree) => Ok(format_tree(&tree)),
                other => Ok(format_event(&SessionEvent::Message(other))),
            }
        }

        Commands::CreateProject { name } => {
            client.create_project(name)?;
            match await_reply(events, CommandTag::CreateProject, wait).await? {
                ServerMessage::ProjectCreated(result) => project_result("Created", &result),
                other => Ok(format_event(&SessionEvent::Message(other))),
            }
        }

        Commands::DeleteProject { project } => {
            client.delete_project(project)?;
            match await_reply(events, CommandTag::DeleteProject, wait).await? {
                ServerMessage::ProjectDeleted(result) => project_result("Deleted", &result),
                other => Ok(format_event(&SessionEvent::Message(other))),
            }
        }

        Commands::AddFile { project, path } => {
            client.add_file(project, path)?;
            let reply = await_reply(events, CommandTag::AddFile, wait).await?;
            Ok(format_event(&SessionEvent::Message(reply)))
        }

        Commands::AddFolder { project, path } => {
            client.add_folder(project, path)?;
            let reply = await_reply(events, CommandTag::AddFolder, wait).await?;
            Ok(format_event(&SessionEvent::Message(reply)))
        }

        Commands::Shares { project } => {
            let list = tokio::time::timeout(wait, client.shared_list(project)?.wait())
                .await
                .map_err(|_| "no response from server")??;

            if list.users.is_empty() {
                return Ok(format!("{} is not shared", project.cyan()).yellow().to_string());
            }
            let mut output = format!("{}\n", format!("Shared {}", project.cyan()).bold());
            for user in &list.users {
                output.push_str(&format!("  {}\n", user));
            }
            Ok(output.trim_end().to_string())
        }

        Commands::Share { project, user } => {
            let result = tokio::time::timeout(wait, client.add_share(project, user)?.wait())
                .await
                .map_err(|_| "no response from server")??;

            if result.success {
                Ok(format!(
                    "{} {} with {}",
                    "Shared".green(),
                    project.cyan(),
                    user
                ))
            } else {
                Err(result
                    .message
                    .unwrap_or_else(|| format!("could not share with {}", user))
                    .into())
            }
        }

        Commands::Unshare { project, user } => {
            client.delete_share(project, user)?;
            match await_reply(events, CommandTag::DeleteShare, wait).await? {
                ServerMessage::ShareDeleted(result) if result.success => Ok(format!(
                    "{} {} from {}",
                    "Removed".green(),
                    user,
                    project.cyan()
                )),
                ServerMessage::ShareDeleted(result) => Err(result
                    .message
                    .unwrap_or_else(|| format!("could not remove {}", user))
                    .into()),
                other => Ok(format_event(&SessionEvent::Message(other))),
            }
        }
    }
}

/// Waits for the next routed message carrying `tag`.
async fn await_reply(
    events: &mut broadcast::Receiver<SessionEvent>,
    tag: CommandTag,
    wait: Duration,
) -> Result<ServerMessage, Box<dyn std::error::Error>> {
    let deadline = tokio::time::Instant::now() + wait;

    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .map_err(|_| format!("no {} response from server", tag))?;

        match event {
            Ok(SessionEvent::Message(message)) if message.command_tag() == tag.code() => {
                return Ok(message)
            }
            Ok(SessionEvent::Error(e)) => return Err(e.into()),
            Ok(SessionEvent::ReconnectFailed { attempts }) => {
                return Err(format!("connection lost after {} reconnect attempts", attempts).into())
            }
            Ok(other) => tracing::debug!("ignoring {:?} while waiting for {}", other, tag),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("event stream lagged by {} events", n)
            }
            Err(broadcast::error::RecvError::Closed) => return Err("connection closed".into()),
        }
    }
}

/// Waits for the LOGIN or REGISTER result and formats a banner.
pub async fn await_auth(
    events: &mut broadcast::Receiver<SessionEvent>,
    wait: Duration,
    verb: &str,
    user: &str,
) -> CommandResult {
    let deadline = tokio::time::Instant::now() + wait;

    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .map_err(|_| "no authentication response from server")?;

        match event {
            Ok(SessionEvent::Message(
                ServerMessage::LoginResult(result) | ServerMessage::RegisterResult(result),
            )) => return auth_banner(verb, user, &result),
            Ok(SessionEvent::Error(e)) => return Err(e.into()),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return Err("connection closed".into()),
        }
    }
}

fn auth_banner(verb: &str, user: &str, result: &AuthResult) -> CommandResult {
    if result.success {
        Ok(format!("{} as {}", verb.green(), user.cyan()))
    } else {
        Err(result
            .message
            .clone()
            .unwrap_or_else(|| "authentication failed".to_string())
            .into())
    }
}

fn project_result(verb: &str, result: &ProjectResult) -> CommandResult {
    if result.success {
        Ok(format!(
            "{} project {}",
            verb.green(),
            result.project_id.as_deref().unwrap_or("?").cyan()
        ))
    } else {
        Err(result
            .message
            .clone()
            .unwrap_or_else(|| "request rejected".to_string())
            .into())
    }
}

fn format_projects(list: &ProjectList) -> String {
    if list.projects.is_empty() {
        return "No projects".yellow().to_string();
    }

    let mut output = String::new();
    for project in &list.projects {
        output.push_str(&format!(
            "  {} {}\n",
            project.project_id.cyan(),
            project.name
        ));
    }
    output.trim_end().to_string()
}

fn format_tree(tree: &FileTree) -> String {
    if tree.entries.is_empty() {
        return format!("{} is empty", tree.project_id.cyan())
            .yellow()
            .to_string();
    }

    let mut output = format!("{}\n", format!("Project {}", tree.project_id.cyan()).bold());
    for entry in &tree.entries {
        if entry.is_dir {
            output.push_str(&format!("  {}/\n", entry.path.blue()));
        } else {
            output.push_str(&format!("  {}\n", entry.path));
        }
    }
    output.trim_end().to_string()
}

/// Formats a session event as a single line.
pub fn format_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Connected => "connected".green().to_string(),
        SessionEvent::Disconnected => "disconnected, reconnecting...".yellow().to_string(),
        SessionEvent::Reconnected => "reconnected".green().to_string(),
        SessionEvent::ReconnectFailed { attempts } => {
            format!("{} after {} attempts", "reconnect failed".red(), attempts)
        }
        SessionEvent::Error(e) => format!("{}: {}", "error".red(), e),
        SessionEvent::Message(message) => format_message(message),
    }
}

fn format_message(message: &ServerMessage) -> String {
    let tag = CommandTag::from_code(message.command_tag())
        .map(|t| t.to_string())
        .unwrap_or_else(|| message.command_tag().to_string());

    let detail = match message {
        ServerMessage::LoginResult(r) | ServerMessage::RegisterResult(r) => {
            format!("success={}", r.success)
        }
        ServerMessage::UserInfo(info) => info.identifier.clone(),
        ServerMessage::ProjectList(list) => format!("{} projects", list.projects.len()),
        ServerMessage::FileTree(tree) => {
            format!("{} ({} entries)", tree.project_id, tree.entries.len())
        }
        ServerMessage::ProjectCreated(r) | ServerMessage::ProjectDeleted(r) => format!(
            "{} success={}",
            r.project_id.as_deref().unwrap_or("?"),
            r.success
        ),
        ServerMessage::SharedList(list) => format!("{}: {}", list.project_id, list.users.join(", ")),
        ServerMessage::ShareAdded(r) | ServerMessage::ShareDeleted(r) => format!(
            "{} {} success={}",
            r.project_id,
            r.user.as_deref().unwrap_or("?"),
            r.success
        ),
        ServerMessage::FileAdded(r) | ServerMessage::FolderAdded(r) => {
            format!("{}:{} success={}", r.project_id, r.path, r.success)
        }
        ServerMessage::Unhandled { payload, .. } => format!("{} bytes", payload.len()),
    };

    format!("[{}] {}", tag.cyan(), detail)
}
