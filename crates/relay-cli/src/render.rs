use chrono::Local;
use relay_core::auth::AuthUser;
use relay_core::gateway::{Issue, IssueListPage, ManagedUser, WhitelistEntry};
use relay_core::notify::Toast;
use textwrap::wrap;

const MAX_COMMENTS: usize = 5;

pub fn print_toast(toast: &Toast) {
    match &toast.message {
        Some(message) => eprintln!("[{}] {}: {}", toast.kind, toast.title, message),
        None => eprintln!("[{}] {}", toast.kind, toast.title),
    }
}

pub fn render_user(user: &AuthUser) {
    println!("Name      : {}", user.display_name());
    println!("Email     : {}", user.email);
    println!("Role      : {}", user.role);
    if let Some(prefs) = &user.preferences {
        println!("Theme     : {}", prefs.theme);
        println!(
            "Notify    : email {}, discord {}",
            on_off(prefs.email_notifications),
            on_off(prefs.discord_notifications)
        );
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

pub fn render_issue_list(page: &IssueListPage) {
    if page.issues.is_empty() {
        println!("No issues found.");
        return;
    }
    println!(
        "{:<12} {:<14} {:<10} {:<10} {:<42} {:<16}",
        "Key", "Status", "Type", "Priority", "Summary", "Updated"
    );
    println!("{}", "-".repeat(108));
    for issue in &page.issues {
        println!(
            "{:<12} {:<14} {:<10} {:<10} {:<42} {:<16}",
            issue.key,
            truncate(issue.status.as_deref().unwrap_or("-"), 14),
            issue.issue_type.map(|t| t.as_str()).unwrap_or("-"),
            issue.priority.map(|p| p.as_str()).unwrap_or("-"),
            truncate(&issue.summary, 42),
            local_time(issue),
        );
    }
    println!(
        "Page {} of {} ({} issues)",
        page.page,
        page.total_pages.max(1),
        page.total
    );
}

pub fn render_issue_summary(issue: &Issue) {
    println!(
        "{:<12} {:<14} {}",
        issue.key,
        issue.status.as_deref().unwrap_or("-"),
        truncate(&issue.summary, 60)
    );
}

pub fn render_issue_detail(issue: &Issue) {
    println!("{} — {}", issue.key, issue.summary);
    if let Some(status) = &issue.status {
        println!("Status    : {}", status);
    }
    if let Some(issue_type) = issue.issue_type {
        println!("Type      : {}", issue_type);
    }
    if let Some(priority) = issue.priority {
        println!("Priority  : {}", priority);
    }
    if let Some(reporter) = &issue.reporter {
        println!("Reporter  : {}", reporter.label());
    }
    let assignee = issue
        .assignee
        .as_ref()
        .map(|a| a.label())
        .unwrap_or("Unassigned");
    println!("Assignee  : {}", assignee);
    println!("Created   : {}", issue.created);
    println!("Updated   : {}", local_time(issue));

    if let Some(description) = &issue.description {
        let trimmed = description.trim();
        if !trimmed.is_empty() {
            println!();
            for line in wrap(trimmed, 80) {
                println!("{}", line);
            }
        }
    }

    if !issue.comments.is_empty() {
        println!();
        println!("Comments ({})", issue.comments.len());
        let skip = issue.comments.len().saturating_sub(MAX_COMMENTS);
        for comment in issue.comments.iter().skip(skip) {
            let author = comment
                .author
                .as_ref()
                .map(|a| a.label())
                .unwrap_or("unknown");
            println!("- {} ({})", author, comment.created);
            for line in wrap(comment.body.trim(), 76) {
                println!("  {}", line);
            }
        }
    }
}

pub fn render_whitelist(entries: &[WhitelistEntry]) {
    if entries.is_empty() {
        println!("Whitelist is empty.");
        return;
    }
    println!("{:<6} {:<36} {:<20} {:<30}", "ID", "Email", "Added by", "Notes");
    println!("{}", "-".repeat(95));
    for entry in entries {
        println!(
            "{:<6} {:<36} {:<20} {:<30}",
            entry.id,
            truncate(&entry.email, 36),
            truncate(
                entry
                    .added_by_name
                    .as_deref()
                    .or(entry.added_by.as_deref())
                    .unwrap_or("-"),
                20
            ),
            truncate(entry.notes.as_deref().unwrap_or(""), 30),
        );
    }
}

pub fn render_users(users: &[ManagedUser]) {
    if users.is_empty() {
        println!("No users found.");
        return;
    }
    println!("{:<28} {:<24} {:<36} {:<6}", "ID", "Name", "Email", "Role");
    println!("{}", "-".repeat(97));
    for user in users {
        println!(
            "{:<28} {:<24} {:<36} {:<6}",
            truncate(&user.user_id, 28),
            truncate(user.name.as_deref().unwrap_or("-"), 24),
            truncate(&user.email, 36),
            user.role,
        );
    }
}

fn local_time(issue: &Issue) -> String {
    issue
        .updated_at()
        .map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| issue.updated.clone())
}

fn truncate(value: &str, max_len: usize) -> String {
    let mut chars = value.chars();
    let mut collected = String::new();
    for _ in 0..max_len.saturating_sub(1) {
        match chars.next() {
            Some(ch) => collected.push(ch),
            None => return value.to_owned(),
        }
    }
    if chars.next().is_some() {
        collected.push('…');
        collected
    } else {
        value.to_owned()
    }
}
